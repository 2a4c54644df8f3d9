//! # Inbound Ports
//!
//! API trait defining what the swap engine can do.

use super::outbound::Invoice;
use crate::domain::{
    CompressedPubkey, HtlcParameters, PaymentHash, Preimage, PreimageRecord, SwapError,
    SwapInstance,
};
use async_trait::async_trait;
use bitcoin::Txid;

/// Swap engine API - inbound port.
#[async_trait]
pub trait SwapApi: Send + Sync {
    /// Generate a secret and register a new HTLC for it.
    ///
    /// The caller is the secret holder; the returned record must be kept
    /// private until claim time.
    async fn initiate_swap(
        &self,
        amount: u64,
        receiver_pubkey: CompressedPubkey,
        sender_pubkey: CompressedPubkey,
        timeout: u32,
    ) -> Result<(SwapInstance, PreimageRecord), SwapError>;

    /// Register an HTLC whose hash was chosen by the counterparty.
    async fn register_swap(&self, params: HtlcParameters) -> Result<SwapInstance, SwapError>;

    /// Build, sign and broadcast the funding transaction.
    async fn fund_swap(
        &self,
        payment_hash: &PaymentHash,
        change_address: &str,
    ) -> Result<Txid, SwapError>;

    /// Record the funding output once confirmed.
    async fn confirm_funding(
        &self,
        payment_hash: &PaymentHash,
        txid: Txid,
        vout: u32,
        height: u64,
    ) -> Result<(), SwapError>;

    /// Create a Lightning invoice bound to the swap's secret.
    async fn create_invoice(
        &self,
        payment_hash: &PaymentHash,
        amount: u64,
        memo: &str,
    ) -> Result<Invoice, SwapError>;

    /// Wait for the invoice to settle and return the revealed secret.
    async fn await_preimage(&self, payment_hash: &PaymentHash) -> Result<Preimage, SwapError>;

    /// Claim the HTLC with the secret.
    async fn claim_swap(
        &self,
        payment_hash: &PaymentHash,
        secret: &Preimage,
        destination: &str,
    ) -> Result<Txid, SwapError>;

    /// Refund the HTLC after its timeout.
    async fn refund_swap(
        &self,
        payment_hash: &PaymentHash,
        refund_address: &str,
    ) -> Result<Txid, SwapError>;

    /// Move every funded swap past its expiry to `Expired`.
    async fn sweep_expired(&self) -> Result<Vec<PaymentHash>, SwapError>;

    /// Swaps whose refund is now eligible.
    async fn refundable_swaps(&self) -> Result<Vec<PaymentHash>, SwapError>;

    /// Snapshot of a swap.
    fn get_swap(&self, payment_hash: &PaymentHash) -> Option<SwapInstance>;
}
