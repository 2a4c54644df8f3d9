//! # Algorithms Module
//!
//! Preimage cryptography, HTLC script compilation and transaction building.

pub mod preimage;
pub mod script;
pub mod transaction;

pub use preimage::{generate, hash160, hash_of, verify, verify_hash160, verify_payment_hash};
pub use script::{
    address_to_script_pubkey, build_script, p2wsh_script_pubkey, parse_script, witness_address,
    ParsedHtlcScript,
};
pub use transaction::{
    build_claim, build_funding, build_refund, estimate_funding_fee, select_utxos,
    HTLC_OUTPUT_INDEX,
};
