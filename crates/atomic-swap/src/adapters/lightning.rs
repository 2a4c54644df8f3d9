//! In-Memory Lightning Node Adapter
//!
//! Implements `LightningNode` for tests and local development. Invoice
//! updates fan out over a broadcast channel; `disconnect_subscribers`
//! drops every open stream to exercise reconnect paths.

use crate::algorithms::hash_of;
use crate::domain::{lifecycle::now_secs, ExternalOrigin, Hash, Preimage, SwapError};
use crate::ports::outbound::{Invoice, InvoiceState, InvoiceStatus, InvoiceStream, LightningNode};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

const UPDATE_BUFFER: usize = 256;

fn lightning_error(message: impl Into<String>) -> SwapError {
    SwapError::external(ExternalOrigin::Lightning, message)
}

/// In-memory Lightning node.
pub struct InMemoryLightningNode {
    invoices: RwLock<HashMap<Hash, InvoiceStatus>>,
    updates: RwLock<broadcast::Sender<InvoiceStatus>>,
    subscribe_failures: AtomicU32,
    fail_lookups: AtomicBool,
    lookup_delay_ms: AtomicU64,
    rebind_hashes: AtomicBool,
}

impl InMemoryLightningNode {
    /// Create a node with no invoices.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            invoices: RwLock::new(HashMap::new()),
            updates: RwLock::new(tx),
            subscribe_failures: AtomicU32::new(0),
            fail_lookups: AtomicBool::new(false),
            lookup_delay_ms: AtomicU64::new(0),
            rebind_hashes: AtomicBool::new(false),
        }
    }

    /// Pay the invoice for `preimage`'s hash, revealing the preimage.
    pub fn settle(&self, preimage: &Preimage) -> Result<(), SwapError> {
        let hash = hash_of(preimage.as_bytes())?;
        let status = {
            let mut invoices = self.invoices.write();
            let invoice = invoices
                .get_mut(&hash)
                .ok_or_else(|| lightning_error("invoice not found"))?;
            if invoice.state == InvoiceState::Canceled {
                return Err(lightning_error("invoice canceled"));
            }
            invoice.state = InvoiceState::Settled;
            invoice.preimage = Some(preimage.clone());
            invoice.amount_paid = invoice.amount_paid.max(1);
            invoice.clone()
        };
        info!(payment_hash = %hex::encode(hash), "[swap] invoice settled");
        let _ = self.updates.read().send(status);
        Ok(())
    }

    /// Cancel an open invoice.
    pub fn cancel(&self, payment_hash: &Hash) -> Result<(), SwapError> {
        let status = {
            let mut invoices = self.invoices.write();
            let invoice = invoices
                .get_mut(payment_hash)
                .ok_or_else(|| lightning_error("invoice not found"))?;
            invoice.state = InvoiceState::Canceled;
            invoice.clone()
        };
        let _ = self.updates.read().send(status);
        Ok(())
    }

    /// Make the next `count` subscribe calls fail.
    pub fn fail_next_subscribes(&self, count: u32) {
        self.subscribe_failures.store(count, Ordering::SeqCst);
    }

    /// Make lookups fail until reset.
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Stall every lookup for `delay` before answering.
    pub fn set_lookup_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.lookup_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Bind new invoices to a hash other than the one requested.
    pub fn set_rebind_hashes(&self, rebind: bool) {
        self.rebind_hashes.store(rebind, Ordering::SeqCst);
    }

    /// End every open subscription stream.
    pub fn disconnect_subscribers(&self) {
        let (tx, _) = broadcast::channel(UPDATE_BUFFER);
        *self.updates.write() = tx;
        debug!("[swap] lightning subscribers disconnected");
    }

    /// Number of open subscription streams.
    pub fn subscriber_count(&self) -> usize {
        self.updates.read().receiver_count()
    }
}

impl Default for InMemoryLightningNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LightningNode for InMemoryLightningNode {
    async fn create_invoice(
        &self,
        payment_hash: Hash,
        amount: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<Invoice, SwapError> {
        let bound_hash = if self.rebind_hashes.load(Ordering::SeqCst) {
            let mut other = payment_hash;
            other[0] ^= 0xFF;
            other
        } else {
            payment_hash
        };
        let mut invoices = self.invoices.write();
        if invoices.contains_key(&bound_hash) {
            return Err(lightning_error("invoice already exists"));
        }
        let created_at = now_secs();
        invoices.insert(
            bound_hash,
            InvoiceStatus {
                payment_hash: bound_hash,
                state: InvoiceState::Open,
                preimage: None,
                amount_paid: 0,
                created_at,
                expiry_secs,
            },
        );
        Ok(Invoice {
            payment_request: format!("lnbcrt{}n1p{}", amount, &hex::encode(bound_hash)[..16]),
            payment_hash: bound_hash,
            amount,
            memo: memo.to_string(),
            expiry_secs,
            created_at,
        })
    }

    async fn lookup_invoice(&self, payment_hash: &Hash) -> Result<InvoiceStatus, SwapError> {
        let delay = self.lookup_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(lightning_error("connection refused"));
        }
        self.invoices
            .read()
            .get(payment_hash)
            .cloned()
            .ok_or_else(|| lightning_error("invoice not found"))
    }

    async fn subscribe_invoices(&self) -> Result<InvoiceStream, SwapError> {
        let remaining = self.subscribe_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.subscribe_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(lightning_error("subscription transport unavailable"));
        }
        let rx = self.updates.read().subscribe();
        let stream = BroadcastStream::new(rx)
            .map(|item| item.map_err(|e| lightning_error(format!("update stream: {e}"))));
        Ok(stream.boxed())
    }
}
