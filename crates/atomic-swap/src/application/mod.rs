//! # Application Layer
//!
//! Cross-ledger coordination and orchestration on top of the domain and
//! algorithms: the Lightning bridge, the streaming settlement monitor and
//! the `SwapApi` service.

pub mod bridge;
pub mod monitor;
pub mod service;

pub use bridge::SwapBridge;
pub use monitor::{SettlementMonitor, SettlementWatch};
pub use service::SwapService;
