//! # Domain Module
//!
//! Core domain types for the atomic swap engine.

pub mod entities;
pub mod errors;
pub mod invariants;
pub mod lifecycle;
pub mod secure_secret;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use invariants::*;
pub use lifecycle::{FundingInfo, SwapInstance, SwapState, TimeoutReport};
pub use secure_secret::Preimage;
pub use value_objects::*;
