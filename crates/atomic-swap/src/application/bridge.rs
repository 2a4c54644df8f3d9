//! # Swap Bridge
//!
//! Couples a Lightning invoice to an on-chain HTLC through one shared
//! secret. The invoice is created for exactly the HTLC's payment hash, so
//! paying it reveals the preimage that unlocks the claim branch.

use crate::algorithms::{hash_of, verify};
use crate::domain::{lifecycle::now_secs, ExternalOrigin, Hash, Preimage, SwapError};
use crate::ports::outbound::{Invoice, InvoiceState, InvoiceStatus, LightningNode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lightning side of a swap.
pub struct SwapBridge<Ln: LightningNode> {
    node: Arc<Ln>,
}

impl<Ln: LightningNode> Clone for SwapBridge<Ln> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<Ln: LightningNode> SwapBridge<Ln> {
    /// Create a bridge over a Lightning node handle.
    pub fn new(node: Arc<Ln>) -> Self {
        Self { node }
    }

    /// The node handle.
    pub fn node(&self) -> &Arc<Ln> {
        &self.node
    }

    /// Create an invoice whose payment hash is SHA-256 of `secret`.
    ///
    /// Fails if the node binds the invoice to any other hash.
    pub async fn create_invoice(
        &self,
        secret: &[u8],
        amount: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<Invoice, SwapError> {
        let payment_hash = hash_of(secret)?;
        if amount == 0 {
            return Err(SwapError::InvalidParameter(
                "invoice amount must be positive".into(),
            ));
        }
        if expiry_secs == 0 {
            return Err(SwapError::InvalidParameter(
                "invoice expiry must be positive".into(),
            ));
        }

        let invoice = self
            .node
            .create_invoice(payment_hash, amount, memo, expiry_secs)
            .await?;
        if invoice.payment_hash != payment_hash {
            warn!(
                requested = %hex::encode(payment_hash),
                bound = %hex::encode(invoice.payment_hash),
                "[swap] node bound invoice to a different hash"
            );
            return Err(SwapError::external(
                ExternalOrigin::Lightning,
                "invoice payment hash does not match the swap secret",
            ));
        }

        info!(
            payment_hash = %hex::encode(payment_hash),
            amount,
            expiry_secs,
            "[swap] invoice created"
        );
        Ok(invoice)
    }

    /// Wait until the invoice settles, is canceled, or `timeout` elapses.
    ///
    /// A `SettlementTimeout` is inconclusive: the invoice may still settle.
    /// Lookup failures are logged and retried on the next poll.
    pub async fn await_settlement(
        &self,
        payment_hash: &Hash,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Preimage, SwapError> {
        if timeout.is_zero() {
            return Err(SwapError::InvalidParameter(
                "settlement timeout must be non-zero".into(),
            ));
        }
        if poll_interval.is_zero() {
            return Err(SwapError::InvalidParameter(
                "poll interval must be non-zero".into(),
            ));
        }

        match tokio::time::timeout(timeout, self.poll_settlement(payment_hash, poll_interval))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    payment_hash = %hex::encode(payment_hash),
                    secs = timeout.as_secs(),
                    "[swap] settlement wait timed out"
                );
                Err(SwapError::SettlementTimeout {
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    async fn poll_settlement(
        &self,
        payment_hash: &Hash,
        poll_interval: Duration,
    ) -> Result<Preimage, SwapError> {
        loop {
            match self.node.lookup_invoice(payment_hash).await {
                Ok(status) => match status.state {
                    InvoiceState::Settled => match status.preimage {
                        Some(preimage) if verify(preimage.as_bytes(), payment_hash) => {
                            info!(
                                payment_hash = %hex::encode(payment_hash),
                                "[swap] invoice settled, preimage revealed"
                            );
                            return Ok(preimage);
                        }
                        Some(_) => {
                            warn!(
                                payment_hash = %hex::encode(payment_hash),
                                "[swap] settled invoice revealed a non-matching preimage"
                            );
                            return Err(SwapError::PreimageMismatch);
                        }
                        None => {
                            warn!(
                                payment_hash = %hex::encode(payment_hash),
                                "[swap] settled invoice carries no preimage yet"
                            );
                        }
                    },
                    InvoiceState::Canceled => {
                        return Err(SwapError::InvoiceCanceled(hex::encode(payment_hash)));
                    }
                    InvoiceState::Open | InvoiceState::Accepted => {}
                },
                Err(e) => {
                    warn!(
                        payment_hash = %hex::encode(payment_hash),
                        error = %e,
                        "[swap] invoice lookup failed, retrying"
                    );
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Current invoice status.
    pub async fn check_invoice_status(&self, payment_hash: &Hash) -> Result<InvoiceStatus, SwapError> {
        let status = self.node.lookup_invoice(payment_hash).await?;
        debug!(
            payment_hash = %hex::encode(payment_hash),
            state = ?status.state,
            "[swap] invoice status"
        );
        Ok(status)
    }

    /// Unix timestamp at which the invoice expires.
    pub async fn invoice_expiry_time(&self, payment_hash: &Hash) -> Result<u64, SwapError> {
        let status = self.node.lookup_invoice(payment_hash).await?;
        Ok(status.expires_at())
    }

    /// Check if the invoice can no longer be paid.
    ///
    /// Settled invoices are never expired; canceled ones always are.
    pub async fn is_invoice_expired(&self, payment_hash: &Hash) -> Result<bool, SwapError> {
        let status = self.node.lookup_invoice(payment_hash).await?;
        Ok(match status.state {
            InvoiceState::Settled => false,
            InvoiceState::Canceled => true,
            InvoiceState::Open | InvoiceState::Accepted => {
                now_secs() >= status.expires_at()
            }
        })
    }
}
