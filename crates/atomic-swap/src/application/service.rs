//! # Swap Service
//!
//! Orchestrates swaps over explicitly injected collaborators: one ledger
//! node, one transaction signer and one Lightning node.
//!
//! Each swap lives behind its own mutex. Locks are never held across an
//! external call: the service snapshots the swap, builds the transaction
//! from the snapshot, signs and broadcasts it, and only then re-enters the
//! lock to record the transition. The final `mark_*` call re-validates, so
//! when two spends race the first to record wins and the other observes
//! `InvalidStateTransition`.

use crate::adapters::SecurePreimageStore;
use crate::algorithms::{
    build_claim, build_funding, build_refund, build_script, estimate_funding_fee, generate,
    hash160, select_utxos, HTLC_OUTPUT_INDEX,
};
use crate::application::bridge::SwapBridge;
use crate::config::SwapConfig;
use crate::domain::{
    CompressedPubkey, HashForm, HtlcParameters, PaymentHash, Preimage, PreimageRecord,
    SwapError, SwapInstance, SwapState, SwapStatus, UnsignedTransaction, Utxo,
};
use crate::ports::inbound::SwapApi;
use crate::ports::outbound::{Invoice, LedgerNode, LightningNode, TransactionSigner};
use async_trait::async_trait;
use bitcoin::Txid;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

type SwapEntry = Arc<Mutex<SwapInstance>>;

/// Swap engine wired to its collaborators.
pub struct SwapService<Lg, S, Ln>
where
    Lg: LedgerNode,
    S: TransactionSigner,
    Ln: LightningNode,
{
    config: SwapConfig,
    swaps: RwLock<HashMap<PaymentHash, SwapEntry>>,
    store: SecurePreimageStore,
    bridge: SwapBridge<Ln>,
    ledger: Arc<Lg>,
    signer: Arc<S>,
}

impl<Lg, S, Ln> SwapService<Lg, S, Ln>
where
    Lg: LedgerNode,
    S: TransactionSigner,
    Ln: LightningNode,
{
    /// Create a service.
    pub fn new(config: SwapConfig, ledger: Arc<Lg>, signer: Arc<S>, lightning: Arc<Ln>) -> Self {
        Self {
            config,
            swaps: RwLock::new(HashMap::new()),
            store: SecurePreimageStore::new(),
            bridge: SwapBridge::new(lightning),
            ledger,
            signer,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    /// Secrets held for swaps this service initiated or learned.
    pub fn preimage_store(&self) -> &SecurePreimageStore {
        &self.store
    }

    /// Lightning bridge.
    pub fn bridge(&self) -> &SwapBridge<Ln> {
        &self.bridge
    }

    /// Number of tracked swaps.
    pub fn swap_count(&self) -> usize {
        self.swaps.read().len()
    }

    /// Payment hashes of swaps currently in `status`.
    pub fn swaps_with_status(&self, status: SwapStatus) -> Vec<PaymentHash> {
        self.entries()
            .into_iter()
            .filter_map(|(hash, entry)| (entry.lock().status() == status).then_some(hash))
            .collect()
    }

    fn entries(&self) -> Vec<(PaymentHash, SwapEntry)> {
        self.swaps
            .read()
            .iter()
            .map(|(hash, entry)| (*hash, Arc::clone(entry)))
            .collect()
    }

    fn entry(&self, payment_hash: &PaymentHash) -> Result<SwapEntry, SwapError> {
        self.swaps
            .read()
            .get(payment_hash)
            .cloned()
            .ok_or_else(|| SwapError::SwapNotFound(payment_hash.to_hex()))
    }

    fn snapshot(&self, payment_hash: &PaymentHash) -> Result<(SwapEntry, SwapInstance), SwapError> {
        let entry = self.entry(payment_hash)?;
        let swap = entry.lock().clone();
        Ok((entry, swap))
    }

    fn check_params(&self, params: &HtlcParameters) -> Result<(), SwapError> {
        if params.network() != self.config.network {
            return Err(SwapError::InvalidParameter(format!(
                "swap is for {}, service runs on {}",
                params.network(),
                self.config.network
            )));
        }
        if params.payment_hash().form() != self.config.hash_form {
            return Err(SwapError::InvalidParameter(format!(
                "payment hash must be in {:?} form",
                self.config.hash_form
            )));
        }
        params
            .network()
            .timing_profile()
            .check_timeout(u32::from(params.timeout()))
    }

    fn insert(&self, swap: SwapInstance) -> Result<SwapInstance, SwapError> {
        let payment_hash = *swap.payment_hash();
        let mut swaps = self.swaps.write();
        if swaps.contains_key(&payment_hash) {
            return Err(SwapError::DuplicateSwap(payment_hash.to_hex()));
        }
        swaps.insert(payment_hash, Arc::new(Mutex::new(swap.clone())));
        info!(
            %payment_hash,
            address = swap.script().address(),
            amount = swap.params().amount(),
            timeout = swap.params().timeout(),
            "[swap] HTLC registered"
        );
        Ok(swap)
    }

    /// The HTLC output as a spendable UTXO, from the recorded funding.
    fn htlc_utxo(swap: &SwapInstance, current_height: u64) -> Result<Utxo, SwapError> {
        let funding = swap.state().funding().ok_or(SwapError::InvalidStateTransition {
            from: swap.status(),
            to: SwapStatus::Funded,
            reason: "HTLC not funded yet",
        })?;
        let confirmations = current_height.saturating_sub(funding.height) + 1;
        Ok(Utxo {
            txid: funding.txid,
            vout: funding.vout,
            amount: swap.params().amount(),
            script_pubkey: swap.script().script_pubkey(),
            confirmations: u32::try_from(confirmations).unwrap_or(u32::MAX),
        })
    }

    async fn sign_and_broadcast(&self, unsigned: &UnsignedTransaction) -> Result<Txid, SwapError> {
        let signed = self.signer.sign(unsigned).await?;
        let txid = self.ledger.broadcast(&signed).await?;
        debug!(kind = ?unsigned.kind, %txid, fee = unsigned.fee, "[swap] signed and broadcast");
        Ok(txid)
    }

    async fn select_funding_utxos(&self, amount: u64) -> Result<Vec<Utxo>, SwapError> {
        let available = self.ledger.list_utxos(self.config.min_confirmations).await?;
        let mut inputs = 1;
        loop {
            let fee = estimate_funding_fee(inputs, self.config.fee_rate);
            let (selected, _) = select_utxos(&available, amount, fee)?;
            if selected.len() <= inputs {
                return Ok(selected);
            }
            inputs = selected.len();
        }
    }
}

#[async_trait]
impl<Lg, S, Ln> SwapApi for SwapService<Lg, S, Ln>
where
    Lg: LedgerNode,
    S: TransactionSigner,
    Ln: LightningNode,
{
    async fn initiate_swap(
        &self,
        amount: u64,
        receiver_pubkey: CompressedPubkey,
        sender_pubkey: CompressedPubkey,
        timeout: u32,
    ) -> Result<(SwapInstance, PreimageRecord), SwapError> {
        let record = generate()?;
        let payment_hash = match self.config.hash_form {
            HashForm::Sha256 => record.payment_hash(),
            HashForm::Hash160 => PaymentHash::Hash160(hash160(record.secret().as_bytes())),
        };
        let params = HtlcParameters::new(
            amount,
            payment_hash.as_bytes(),
            receiver_pubkey.as_bytes(),
            sender_pubkey.as_bytes(),
            timeout,
            self.config.network,
        )?;
        self.check_params(&params)?;
        let swap = self.insert(SwapInstance::new(build_script(&params)?))?;
        self.store.store(payment_hash, record.secret().clone())?;
        Ok((swap, record))
    }

    async fn register_swap(&self, params: HtlcParameters) -> Result<SwapInstance, SwapError> {
        self.check_params(&params)?;
        self.insert(SwapInstance::new(build_script(&params)?))
    }

    async fn fund_swap(
        &self,
        payment_hash: &PaymentHash,
        change_address: &str,
    ) -> Result<Txid, SwapError> {
        let (_, swap) = self.snapshot(payment_hash)?;
        if !matches!(swap.state(), SwapState::Created) {
            return Err(SwapError::InvalidStateTransition {
                from: swap.status(),
                to: SwapStatus::Funded,
                reason: "HTLC already funded",
            });
        }
        let height = self.ledger.block_height().await?;
        swap.validate_timeout(height, true)?;

        let utxos = self.select_funding_utxos(swap.params().amount()).await?;
        let unsigned = build_funding(swap.script(), &utxos, change_address, self.config.fee_rate)?;
        let txid = self.sign_and_broadcast(&unsigned).await?;
        info!(
            %payment_hash,
            %txid,
            vout = HTLC_OUTPUT_INDEX,
            fee = unsigned.fee,
            "[swap] funding broadcast"
        );
        Ok(txid)
    }

    async fn confirm_funding(
        &self,
        payment_hash: &PaymentHash,
        txid: Txid,
        vout: u32,
        height: u64,
    ) -> Result<(), SwapError> {
        let entry = self.entry(payment_hash)?;
        let mut swap = entry.lock();
        swap.mark_funded(txid, vout, height)
    }

    async fn create_invoice(
        &self,
        payment_hash: &PaymentHash,
        amount: u64,
        memo: &str,
    ) -> Result<Invoice, SwapError> {
        if payment_hash.form() != HashForm::Sha256 {
            return Err(SwapError::InvalidParameter(
                "Lightning invoices need a SHA-256 payment hash".into(),
            ));
        }
        self.entry(payment_hash)?;
        let secret = self.store.retrieve(payment_hash).ok_or_else(|| {
            SwapError::InvalidParameter(format!("no secret held for {payment_hash}"))
        })?;
        self.bridge
            .create_invoice(secret.as_bytes(), amount, memo, self.config.invoice_expiry_secs)
            .await
    }

    async fn await_preimage(&self, payment_hash: &PaymentHash) -> Result<Preimage, SwapError> {
        let PaymentHash::Sha256(hash) = *payment_hash else {
            return Err(SwapError::InvalidParameter(
                "Lightning settlement needs a SHA-256 payment hash".into(),
            ));
        };
        self.entry(payment_hash)?;
        let preimage = self
            .bridge
            .await_settlement(
                &hash,
                self.config.settlement_timeout(),
                self.config.settlement_poll_interval(),
            )
            .await?;
        self.store.store(*payment_hash, preimage.clone())?;
        Ok(preimage)
    }

    async fn claim_swap(
        &self,
        payment_hash: &PaymentHash,
        secret: &Preimage,
        destination: &str,
    ) -> Result<Txid, SwapError> {
        let (entry, swap) = self.snapshot(payment_hash)?;
        swap.can_claim(secret)?;
        let height = self.ledger.block_height().await?;
        let utxo = Self::htlc_utxo(&swap, height)?;
        let unsigned = build_claim(&swap, &utxo, secret, destination, self.config.claim_fee)?;
        let txid = self.sign_and_broadcast(&unsigned).await?;

        if let Err(e) = entry.lock().mark_claimed(txid, secret) {
            warn!(%payment_hash, %txid, error = %e, "[swap] claim lost the race");
            return Err(e);
        }
        self.store.remove(payment_hash);
        Ok(txid)
    }

    async fn refund_swap(
        &self,
        payment_hash: &PaymentHash,
        refund_address: &str,
    ) -> Result<Txid, SwapError> {
        let (entry, swap) = self.snapshot(payment_hash)?;
        let height = self.ledger.block_height().await?;
        let require_margin = self.config.require_refund_margin;
        swap.can_refund(height, require_margin)?;
        let utxo = Self::htlc_utxo(&swap, height)?;
        let unsigned = build_refund(
            &swap,
            &utxo,
            refund_address,
            self.config.claim_fee,
            height,
            require_margin,
        )?;
        let txid = self.sign_and_broadcast(&unsigned).await?;

        if let Err(e) = entry
            .lock()
            .mark_refunded_with_margin(txid, height, require_margin)
        {
            warn!(%payment_hash, %txid, error = %e, "[swap] refund lost the race");
            return Err(e);
        }
        self.store.remove(payment_hash);
        Ok(txid)
    }

    async fn sweep_expired(&self) -> Result<Vec<PaymentHash>, SwapError> {
        let height = self.ledger.block_height().await?;
        let mut expired = Vec::new();
        for (payment_hash, entry) in self.entries() {
            let mut swap = entry.lock();
            let due = matches!(swap.state(), SwapState::Funded { funding } if funding.expiry_height <= height);
            if due && swap.mark_expired(height).is_ok() {
                expired.push(payment_hash);
            }
        }
        if !expired.is_empty() {
            info!(height, count = expired.len(), "[swap] expiry sweep");
        }
        Ok(expired)
    }

    async fn refundable_swaps(&self) -> Result<Vec<PaymentHash>, SwapError> {
        let height = self.ledger.block_height().await?;
        let require_margin = self.config.require_refund_margin;
        Ok(self
            .entries()
            .into_iter()
            .filter_map(|(hash, entry)| {
                entry
                    .lock()
                    .can_refund(height, require_margin)
                    .is_ok()
                    .then_some(hash)
            })
            .collect())
    }

    fn get_swap(&self, payment_hash: &PaymentHash) -> Option<SwapInstance> {
        let entry = self.swaps.read().get(payment_hash).cloned()?;
        let swap = entry.lock().clone();
        Some(swap)
    }
}
