//! # Domain Entities
//!
//! HTLC parameters, the compiled script, preimage records and the
//! transaction shapes the builder hands to the signer.

use super::errors::{Hash, Hash160, SwapError};
use super::secure_secret::Preimage;
use super::value_objects::{CompressedPubkey, Network, PaymentHash, MAX_RELATIVE_TIMEOUT};
use bitcoin::{OutPoint, ScriptBuf, Transaction, TxOut, Txid, Witness};
use serde::Serialize;

fn as_parameter(err: SwapError) -> SwapError {
    match err {
        SwapError::InvalidLength { .. } => SwapError::InvalidParameter(err.to_string()),
        other => other,
    }
}

/// Validated HTLC parameters.
///
/// Every field is checked in [`HtlcParameters::new`]; there is no way to
/// build an out-of-range value afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HtlcParameters {
    amount: u64,
    payment_hash: PaymentHash,
    receiver_pubkey: CompressedPubkey,
    sender_pubkey: CompressedPubkey,
    timeout: u16,
    network: Network,
}

impl HtlcParameters {
    /// Validate and build.
    ///
    /// Fails with `InvalidParameter` on a zero amount, a hash that is not
    /// 20 or 32 bytes, a key that is not a 33-byte compressed key, or a
    /// timeout outside `1..=65535`.
    pub fn new(
        amount: u64,
        payment_hash: &[u8],
        receiver_pubkey: &[u8],
        sender_pubkey: &[u8],
        timeout: u32,
        network: Network,
    ) -> Result<Self, SwapError> {
        if amount == 0 {
            return Err(SwapError::InvalidParameter(
                "amount must be positive, got 0".into(),
            ));
        }
        let payment_hash = PaymentHash::from_slice(payment_hash).map_err(as_parameter)?;
        let receiver_pubkey =
            CompressedPubkey::from_slice(receiver_pubkey).map_err(as_parameter)?;
        let sender_pubkey = CompressedPubkey::from_slice(sender_pubkey).map_err(as_parameter)?;
        if timeout == 0 || timeout > MAX_RELATIVE_TIMEOUT {
            return Err(SwapError::InvalidParameter(format!(
                "timeout must be in 1..={MAX_RELATIVE_TIMEOUT} blocks, got {timeout}"
            )));
        }
        Ok(Self {
            amount,
            payment_hash,
            receiver_pubkey,
            sender_pubkey,
            timeout: timeout as u16,
            network,
        })
    }

    /// Locked amount in sats.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Payment hash as supplied.
    pub fn payment_hash(&self) -> &PaymentHash {
        &self.payment_hash
    }

    /// Receiver (claim branch) key.
    pub fn receiver_pubkey(&self) -> &CompressedPubkey {
        &self.receiver_pubkey
    }

    /// Sender (refund branch) key.
    pub fn sender_pubkey(&self) -> &CompressedPubkey {
        &self.sender_pubkey
    }

    /// Relative timeout in blocks.
    pub fn timeout(&self) -> u16 {
        self.timeout
    }

    /// Network.
    pub fn network(&self) -> Network {
        self.network
    }
}

/// A compiled HTLC script and its derived witness program.
///
/// Built by [`crate::algorithms::build_script`]. Immutable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledHtlcScript {
    pub(crate) params: HtlcParameters,
    pub(crate) hash160: Hash160,
    pub(crate) script: ScriptBuf,
    pub(crate) script_hash: Hash,
    pub(crate) address: String,
}

impl CompiledHtlcScript {
    /// Parameters the script was built from.
    pub fn params(&self) -> &HtlcParameters {
        &self.params
    }

    /// The 20-byte hash embedded in the claim branch.
    pub fn hash160(&self) -> &Hash160 {
        &self.hash160
    }

    /// The witness script.
    pub fn script(&self) -> &ScriptBuf {
        &self.script
    }

    /// Serialized script bytes.
    pub fn script_bytes(&self) -> &[u8] {
        self.script.as_bytes()
    }

    /// Serialized script as hex.
    pub fn script_hex(&self) -> String {
        hex::encode(self.script.as_bytes())
    }

    /// SHA-256 of the script (the v0 witness program).
    pub fn script_hash(&self) -> &Hash {
        &self.script_hash
    }

    /// P2WSH address on the parameters' network.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// P2WSH address on another network (e.g. the testnet twin).
    pub fn address_for(&self, network: Network) -> Result<String, SwapError> {
        crate::algorithms::script::witness_address(&self.script_hash, network)
    }

    /// `OP_0 <script_hash>` output script.
    pub fn script_pubkey(&self) -> ScriptBuf {
        crate::algorithms::script::p2wsh_script_pubkey(&self.script_hash)
    }
}

/// A freshly generated secret and its SHA-256 hash.
///
/// The secret zeroizes when the record drops.
#[derive(Clone, Debug)]
pub struct PreimageRecord {
    pub(crate) secret: Preimage,
    pub(crate) hash: Hash,
}

impl PreimageRecord {
    /// The secret.
    pub fn secret(&self) -> &Preimage {
        &self.secret
    }

    /// SHA-256(secret).
    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    /// The hash as a [`PaymentHash`].
    pub fn payment_hash(&self) -> PaymentHash {
        PaymentHash::Sha256(self.hash)
    }

    /// Secret as hex. The returned string is not zeroized.
    pub fn to_hex(&self) -> String {
        self.secret.to_hex()
    }

    /// Split into secret and hash.
    pub fn into_parts(self) -> (Preimage, Hash) {
        (self.secret, self.hash)
    }
}

/// A spendable output reported by the ledger node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Utxo {
    /// Funding transaction id.
    pub txid: Txid,
    /// Output index.
    pub vout: u32,
    /// Value in sats.
    pub amount: u64,
    /// Locking script.
    pub script_pubkey: ScriptBuf,
    /// Confirmations at listing time.
    pub confirmations: u32,
}

impl Utxo {
    /// Outpoint.
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    /// As a previous output, for sighash computation.
    pub fn to_txout(&self) -> TxOut {
        TxOut {
            value: bitcoin::Amount::from_sat(self.amount),
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// Which transaction the builder produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpendKind {
    /// Wallet inputs into the HTLC output.
    Funding,
    /// HTLC output via the hash branch.
    Claim,
    /// HTLC output via the timeout branch.
    Refund,
}

/// One slot of an HTLC spending witness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WitnessElement {
    /// Placeholder for the signer's signature.
    Signature,
    /// The preimage (claim branch).
    Preimage(Preimage),
    /// `0x01`: select the `OP_IF` branch.
    ClaimSelector,
    /// Empty push: selects `OP_ELSE` in the refund branch.
    Empty,
    /// The witness script.
    Script(Vec<u8>),
}

/// Witness stack shape the signer must fill in for input 0.
///
/// Claim: `[sig, preimage, 0x01, script]`. Refund: `[sig, <empty>, script]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessTemplate {
    /// Stack elements, bottom first.
    pub elements: Vec<WitnessElement>,
}

impl WitnessTemplate {
    /// Claim-branch template.
    pub fn claim(secret: Preimage, script: &ScriptBuf) -> Self {
        Self {
            elements: vec![
                WitnessElement::Signature,
                WitnessElement::Preimage(secret),
                WitnessElement::ClaimSelector,
                WitnessElement::Script(script.to_bytes()),
            ],
        }
    }

    /// Refund-branch template.
    pub fn refund(script: &ScriptBuf) -> Self {
        Self {
            elements: vec![
                WitnessElement::Signature,
                WitnessElement::Empty,
                WitnessElement::Script(script.to_bytes()),
            ],
        }
    }

    /// Fill the signature slot and produce the final witness.
    pub fn assemble(&self, signature: &[u8]) -> Witness {
        let mut witness = Witness::new();
        for element in &self.elements {
            match element {
                WitnessElement::Signature => witness.push(signature),
                WitnessElement::Preimage(p) => witness.push(p.as_bytes()),
                WitnessElement::ClaimSelector => witness.push([0x01u8]),
                WitnessElement::Empty => witness.push([0u8; 0]),
                WitnessElement::Script(s) => witness.push(s),
            }
        }
        witness
    }

    /// The witness script, if present.
    pub fn witness_script(&self) -> Option<&[u8]> {
        self.elements.iter().find_map(|e| match e {
            WitnessElement::Script(s) => Some(s.as_slice()),
            _ => None,
        })
    }
}

/// An unsigned transaction plus what the signer needs to finish it.
///
/// Inputs carry empty witnesses; [`UnsignedTransaction::needs_witness`]
/// is always true until a signer replaces the transaction.
#[derive(Clone, Debug)]
pub struct UnsignedTransaction {
    /// What this transaction does.
    pub kind: SpendKind,
    /// The transaction, witnesses empty.
    pub tx: Transaction,
    /// Previous outputs, one per input, for sighash computation.
    pub prevouts: Vec<TxOut>,
    /// HTLC spending witness shape (claim/refund only).
    pub witness: Option<WitnessTemplate>,
    /// Fee paid, in sats.
    pub fee: u64,
    /// Change returned to the wallet (funding only).
    pub change: Option<u64>,
}

impl UnsignedTransaction {
    /// Transaction id. Segwit ids do not commit to witnesses, so this is
    /// also the id of the signed transaction.
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    /// Check if any input still lacks witness data.
    pub fn needs_witness(&self) -> bool {
        self.tx.input.iter().any(|i| i.witness.is_empty())
    }

    /// Consensus-serialized hex.
    pub fn to_hex(&self) -> String {
        bitcoin::consensus::encode::serialize_hex(&self.tx)
    }

    /// Sum of output values.
    pub fn output_total(&self) -> u64 {
        self.tx.output.iter().map(|o| o.value.to_sat()).sum()
    }
}
