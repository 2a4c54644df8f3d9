//! # Atomic Swap Engine
//!
//! Trustless swaps between an on-chain ledger (Bitcoin or a Bitcoin-like
//! sidechain) and the Lightning Network using Hash Time-Locked Contracts.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! - Preimage cryptography with zeroizing secrets and constant-time checks
//! - P2WSH HTLC script construction and parsing
//! - HTLC lifecycle with reorg-safety accounting
//! - Funding, claim and refund transaction building
//! - Lightning invoice settlement feeding on-chain claims
//!
//! ## HTLC Script
//!
//! ```text
//! OP_IF
//!     OP_HASH160 <hash160> OP_EQUALVERIFY <receiver_pubkey> OP_CHECKSIG
//! OP_ELSE
//!     <timeout> OP_CHECKSEQUENCEVERIFY OP_DROP <sender_pubkey> OP_CHECKSIG
//! OP_ENDIF
//! ```
//!
//! ## Lifecycle
//!
//! | From | To |
//! |------|----|
//! | Created | Funded |
//! | Funded | Claimed, Expired, Refunded |
//! | Expired | Refunded |
//!
//! ## Module Structure
//!
//! ```text
//! atomic-swap/
//! ├── domain/          # Parameters, lifecycle, errors, invariants
//! ├── algorithms/      # Preimage, script, transaction builders
//! ├── ports/           # SwapApi, LedgerNode, TransactionSigner, LightningNode
//! ├── adapters/        # Secret store, in-memory collaborators, local signer
//! ├── application/     # SwapBridge, SettlementMonitor, SwapService
//! ├── config.rs        # SwapConfig
//! └── telemetry.rs     # tracing subscriber setup
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;

// Re-exports
pub use adapters::{InMemoryLedger, InMemoryLightningNode, LocalKeySigner, SecurePreimageStore};
pub use algorithms::{
    build_claim, build_funding, build_refund, build_script, estimate_funding_fee, generate,
    hash160, hash_of, parse_script, select_utxos, verify, verify_hash160, verify_payment_hash,
    witness_address, ParsedHtlcScript,
};
pub use application::{SettlementMonitor, SettlementWatch, SwapBridge, SwapService};
pub use config::SwapConfig;
pub use domain::{
    invariant_above_dust, invariant_claim_sequence, invariant_refund_sequence,
    CompiledHtlcScript, CompressedPubkey, ErrorKind, ExternalOrigin, FundingInfo, Hash, Hash160,
    HashForm, HtlcParameters, Network, NetworkTimingProfile, PaymentHash, Preimage,
    PreimageRecord, SpendKind, SwapError, SwapInstance, SwapState, SwapStatus, TimeoutReport,
    UnsignedTransaction, Utxo, WitnessTemplate, CLAIM_SEQUENCE, DUST_LIMIT,
};
pub use ports::{
    Invoice, InvoiceState, InvoiceStatus, InvoiceStream, LedgerNode, LightningNode, SwapApi,
    TransactionSigner,
};
pub use telemetry::{init_tracing, TelemetryConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
