//! Secure Preimage Store Adapter
//!
//! In-memory map from payment hash to secret for swaps in flight.
//! Entries are write-once, verified on insert and zeroized on removal.
//! Nothing here is ever persisted.

use crate::algorithms::verify_payment_hash;
use crate::domain::{PaymentHash, Preimage, SwapError};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};
use zeroize::Zeroize;

/// Shared secret store.
///
/// Readers never observe a half-written entry: inserts happen under the
/// write lock with a fully built value.
#[derive(Default)]
pub struct SecurePreimageStore {
    secrets: RwLock<HashMap<PaymentHash, Preimage>>,
}

impl SecurePreimageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a secret under its hash.
    ///
    /// The secret must verify against `payment_hash`. Returns `false` if
    /// the hash was already stored, in which case the existing entry is
    /// kept.
    pub fn store(&self, payment_hash: PaymentHash, secret: Preimage) -> Result<bool, SwapError> {
        if !verify_payment_hash(secret.as_bytes(), &payment_hash) {
            warn!(%payment_hash, "[swap] refusing to store non-matching preimage");
            return Err(SwapError::PreimageMismatch);
        }
        let mut secrets = self.secrets.write();
        if secrets.contains_key(&payment_hash) {
            return Ok(false);
        }
        secrets.insert(payment_hash, secret);
        debug!(%payment_hash, "[swap] preimage stored");
        Ok(true)
    }

    /// Copy of the secret for `payment_hash`.
    pub fn retrieve(&self, payment_hash: &PaymentHash) -> Option<Preimage> {
        self.secrets.read().get(payment_hash).cloned()
    }

    /// Check if a secret is held for `payment_hash`.
    pub fn contains(&self, payment_hash: &PaymentHash) -> bool {
        self.secrets.read().contains_key(payment_hash)
    }

    /// Remove and zeroize the secret. Returns whether one was present.
    pub fn remove(&self, payment_hash: &PaymentHash) -> bool {
        match self.secrets.write().remove(payment_hash) {
            Some(mut secret) => {
                secret.zeroize();
                debug!(%payment_hash, "[swap] preimage erased");
                true
            }
            None => false,
        }
    }

    /// Remove and zeroize every secret. Returns how many were held.
    pub fn clear_all(&self) -> usize {
        let mut secrets = self.secrets.write();
        let count = secrets.len();
        for (_, mut secret) in secrets.drain() {
            secret.zeroize();
        }
        count
    }

    /// Number of secrets held.
    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.secrets.read().is_empty()
    }
}

impl Drop for SecurePreimageStore {
    fn drop(&mut self) {
        self.clear_all();
    }
}
