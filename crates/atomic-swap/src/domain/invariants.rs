//! # Domain Invariants
//!
//! Rules every HTLC transaction must satisfy before it leaves the builder.

use super::errors::SwapError;
use super::value_objects::DUST_LIMIT;
use bitcoin::{Sequence, Transaction};

/// Sequence for the claim input: final-minus-one.
///
/// Relative locktime is disabled on this input (bit 31 set) while the
/// transaction stays BIP68-aware.
pub const CLAIM_SEQUENCE: Sequence = Sequence(0xFFFF_FFFE);

/// Invariant: output after fee stays above the dust limit.
///
/// Returns the output value on success.
pub fn invariant_above_dust(input_value: u64, fee: u64) -> Result<u64, SwapError> {
    let value = input_value as i64 - fee as i64;
    if value <= DUST_LIMIT as i64 {
        return Err(SwapError::DustOutput {
            value,
            dust_limit: DUST_LIMIT,
        });
    }
    Ok(value as u64)
}

/// Invariant: the claim input disables relative locktime.
pub fn invariant_claim_sequence(tx: &Transaction) -> bool {
    tx.input.len() == 1 && tx.input[0].sequence == CLAIM_SEQUENCE
}

/// Invariant: the refund input's sequence equals the HTLC timeout.
///
/// `OP_CHECKSEQUENCEVERIFY` compares the script's timeout against this
/// field, so anything smaller makes the refund branch unspendable.
pub fn invariant_refund_sequence(tx: &Transaction, timeout: u16) -> bool {
    tx.input.len() == 1 && tx.input[0].sequence == Sequence::from_height(timeout)
}
