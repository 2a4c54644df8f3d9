//! # Adapters Layer (Hexagonal Architecture)
//!
//! In-process implementations of the outbound ports plus the secret store.
//! Production deployments swap the ledger, signer and Lightning adapters
//! for RPC-backed ones; the store stays in-process.

mod ledger;
mod lightning;
mod preimage_store;
mod signer;

pub use ledger::InMemoryLedger;
pub use lightning::InMemoryLightningNode;
pub use preimage_store::SecurePreimageStore;
pub use signer::LocalKeySigner;
