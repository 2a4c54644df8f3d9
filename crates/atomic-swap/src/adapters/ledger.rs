//! In-Memory Ledger Node Adapter
//!
//! Implements `LedgerNode` over a tip height, a wallet UTXO set and a
//! broadcast log.

use crate::domain::{ExternalOrigin, SwapError, Utxo};
use crate::ports::outbound::LedgerNode;
use async_trait::async_trait;
use bitcoin::{Transaction, Txid};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

/// In-memory ledger node.
pub struct InMemoryLedger {
    height: AtomicU64,
    utxos: RwLock<Vec<Utxo>>,
    broadcasts: RwLock<Vec<Transaction>>,
    fail_broadcast: AtomicBool,
}

impl InMemoryLedger {
    /// Create a ledger at `height`.
    pub fn new(height: u64) -> Self {
        Self {
            height: AtomicU64::new(height),
            utxos: RwLock::new(Vec::new()),
            broadcasts: RwLock::new(Vec::new()),
            fail_broadcast: AtomicBool::new(false),
        }
    }

    /// Set the tip height.
    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Advance the tip by `blocks`.
    pub fn mine(&self, blocks: u64) -> u64 {
        self.height.fetch_add(blocks, Ordering::SeqCst) + blocks
    }

    /// Add a wallet UTXO.
    pub fn add_utxo(&self, utxo: Utxo) {
        self.utxos.write().push(utxo);
    }

    /// Make broadcasts fail until reset.
    pub fn set_fail_broadcast(&self, fail: bool) {
        self.fail_broadcast.store(fail, Ordering::SeqCst);
    }

    /// Every transaction broadcast so far.
    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.broadcasts.read().clone()
    }
}

#[async_trait]
impl LedgerNode for InMemoryLedger {
    async fn block_height(&self) -> Result<u64, SwapError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn list_utxos(&self, min_confirmations: u32) -> Result<Vec<Utxo>, SwapError> {
        Ok(self
            .utxos
            .read()
            .iter()
            .filter(|u| u.confirmations >= min_confirmations)
            .cloned()
            .collect())
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, SwapError> {
        if self.fail_broadcast.load(Ordering::SeqCst) {
            return Err(SwapError::external(
                ExternalOrigin::Ledger,
                "broadcast rejected: node unreachable",
            ));
        }
        if tx.input.iter().any(|i| i.witness.is_empty()) {
            return Err(SwapError::external(
                ExternalOrigin::Ledger,
                "broadcast rejected: missing witness",
            ));
        }
        let txid = tx.compute_txid();
        self.utxos.write().retain(|u| {
            !tx.input
                .iter()
                .any(|i| i.previous_output == u.outpoint())
        });
        self.broadcasts.write().push(tx.clone());
        info!(%txid, "[swap] transaction broadcast");
        debug!(inputs = tx.input.len(), outputs = tx.output.len(), "[swap] broadcast detail");
        Ok(txid)
    }
}
