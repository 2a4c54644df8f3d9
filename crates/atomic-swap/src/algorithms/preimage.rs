//! # Preimage Generation and Verification
//!
//! Cryptographic operations for HTLC secrets. All comparisons against an
//! expected hash go through `subtle` so timing does not depend on where
//! the first differing byte sits.

use crate::domain::{
    Hash, Hash160, PaymentHash, Preimage, PreimageRecord, SwapError, PREIMAGE_SIZE,
};
use bitcoin::hashes::Hash as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Generate a fresh 32-byte secret from the OS entropy source.
pub fn generate() -> Result<PreimageRecord, SwapError> {
    let mut bytes = [0u8; PREIMAGE_SIZE];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| SwapError::Entropy(e.to_string()))?;
    let secret = Preimage::new(bytes);
    bytes.zeroize();
    let hash = sha256(secret.as_bytes());
    Ok(PreimageRecord { secret, hash })
}

/// SHA-256 of a 32-byte secret.
pub fn hash_of(secret: &[u8]) -> Result<Hash, SwapError> {
    if secret.len() != PREIMAGE_SIZE {
        return Err(SwapError::InvalidLength {
            what: "preimage",
            expected: "32",
            got: secret.len(),
        });
    }
    Ok(sha256(secret))
}

/// Check `SHA-256(secret) == expected_hash` in constant time.
///
/// Wrong lengths return false rather than an error.
pub fn verify(secret: &[u8], expected_hash: &[u8]) -> bool {
    if secret.len() != PREIMAGE_SIZE || expected_hash.len() != 32 {
        return false;
    }
    sha256(secret)[..].ct_eq(expected_hash).into()
}

/// Check `HASH160(secret) == expected` in constant time.
pub fn verify_hash160(secret: &[u8], expected: &[u8]) -> bool {
    if secret.len() != PREIMAGE_SIZE || expected.len() != 20 {
        return false;
    }
    hash160(secret)[..].ct_eq(expected).into()
}

/// Check `secret` against a payment hash in either form.
pub fn verify_payment_hash(secret: &[u8], payment_hash: &PaymentHash) -> bool {
    match payment_hash {
        PaymentHash::Sha256(h) => verify(secret, h),
        PaymentHash::Hash160(h) => verify_hash160(secret, h),
    }
}

/// RIPEMD160(SHA-256(data)).
pub fn hash160(data: &[u8]) -> Hash160 {
    bitcoin::hashes::hash160::Hash::hash(data).to_byte_array()
}

fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}
