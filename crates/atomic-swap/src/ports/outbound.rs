//! # Outbound Ports
//!
//! Traits for the external collaborators: ledger node, transaction
//! signer and Lightning node. The engine never holds private keys and
//! never retries these calls itself.

use crate::domain::{Hash, Preimage, SwapError, UnsignedTransaction, Utxo};
use async_trait::async_trait;
use bitcoin::{Transaction, Txid};
use futures::stream::BoxStream;
use serde::Serialize;

/// Ledger node - outbound port.
#[async_trait]
pub trait LedgerNode: Send + Sync {
    /// Current chain tip height. Authoritative for every timeout check.
    async fn block_height(&self) -> Result<u64, SwapError>;

    /// Wallet UTXOs with at least `min_confirmations`.
    async fn list_utxos(&self, min_confirmations: u32) -> Result<Vec<Utxo>, SwapError>;

    /// Broadcast a signed transaction.
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, SwapError>;
}

/// Transaction signer - outbound port.
///
/// Receives the unsigned transaction with its prevouts and witness
/// template, and returns the fully witnessed transaction.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Sign every input.
    async fn sign(&self, unsigned: &UnsignedTransaction) -> Result<Transaction, SwapError>;
}

/// Lightning invoice state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceState {
    /// Awaiting payment.
    Open,
    /// HTLC accepted, not yet settled (hold invoices).
    Accepted,
    /// Paid; the preimage is revealed.
    Settled,
    /// Canceled or expired.
    Canceled,
}

/// A created invoice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Invoice {
    /// BOLT11 payment request.
    pub payment_request: String,
    /// Payment hash the node bound the invoice to.
    #[serde(with = "hex::serde")]
    pub payment_hash: Hash,
    /// Amount in sats.
    pub amount: u64,
    /// Description.
    pub memo: String,
    /// Expiry in seconds from creation.
    pub expiry_secs: u64,
    /// Unix timestamp.
    pub created_at: u64,
}

impl Invoice {
    /// Unix timestamp after which the invoice can no longer be paid.
    pub fn expires_at(&self) -> u64 {
        self.created_at.saturating_add(self.expiry_secs)
    }
}

/// Invoice lookup result, also the item type of the settlement stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvoiceStatus {
    /// Payment hash.
    pub payment_hash: Hash,
    /// Current state.
    pub state: InvoiceState,
    /// Revealed preimage, present once settled.
    pub preimage: Option<Preimage>,
    /// Amount paid in sats.
    pub amount_paid: u64,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Expiry in seconds from creation.
    pub expiry_secs: u64,
}

impl InvoiceStatus {
    /// Check if settled.
    pub fn is_settled(&self) -> bool {
        self.state == InvoiceState::Settled
    }

    /// Unix timestamp after which an open invoice can no longer be paid.
    pub fn expires_at(&self) -> u64 {
        self.created_at.saturating_add(self.expiry_secs)
    }
}

/// Stream of invoice updates.
pub type InvoiceStream = BoxStream<'static, Result<InvoiceStatus, SwapError>>;

/// Lightning node - outbound port.
#[async_trait]
pub trait LightningNode: Send + Sync {
    /// Create an invoice bound to exactly `payment_hash`.
    async fn create_invoice(
        &self,
        payment_hash: Hash,
        amount: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<Invoice, SwapError>;

    /// Look up an invoice.
    async fn lookup_invoice(&self, payment_hash: &Hash) -> Result<InvoiceStatus, SwapError>;

    /// Subscribe to invoice updates. The stream ends or yields an error
    /// when the transport drops.
    async fn subscribe_invoices(&self) -> Result<InvoiceStream, SwapError>;
}
