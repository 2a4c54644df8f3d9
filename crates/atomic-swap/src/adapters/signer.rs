//! Local Key Signer Adapter
//!
//! Implements `TransactionSigner` with a single in-process secp256k1 key.
//! HTLC inputs are signed with a P2WSH sighash over the template's witness
//! script; wallet inputs are signed as P2WPKH.

use crate::domain::{ExternalOrigin, SwapError, UnsignedTransaction};
use crate::ports::outbound::TransactionSigner;
use async_trait::async_trait;
use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ecdsa, CompressedPublicKey, Script, ScriptBuf, Transaction, Witness};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

fn signer_error(message: impl std::fmt::Display) -> SwapError {
    SwapError::external(ExternalOrigin::Signer, message.to_string())
}

/// Signer holding one key.
pub struct LocalKeySigner {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    public_key: PublicKey,
    fail: AtomicBool,
}

impl LocalKeySigner {
    /// Create from 32 secret key bytes.
    pub fn new(secret_key: &[u8]) -> Result<Self, SwapError> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(secret_key)
            .map_err(|e| SwapError::InvalidParameter(format!("secret key: {e}")))?;
        let public_key = secret_key.public_key(&secp);
        Ok(Self {
            secp,
            secret_key,
            public_key,
            fail: AtomicBool::new(false),
        })
    }

    /// Compressed public key bytes.
    pub fn pubkey_bytes(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    /// P2WPKH output script for this key, for wallet UTXOs.
    pub fn wallet_script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&CompressedPublicKey(self.public_key).wpubkey_hash())
    }

    /// Make signing fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn sign_digest(&self, digest: [u8; 32]) -> ecdsa::Signature {
        let msg = Message::from_digest(digest);
        ecdsa::Signature {
            signature: self.secp.sign_ecdsa(&msg, &self.secret_key),
            sighash_type: EcdsaSighashType::All,
        }
    }
}

#[async_trait]
impl TransactionSigner for LocalKeySigner {
    async fn sign(&self, unsigned: &UnsignedTransaction) -> Result<Transaction, SwapError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(signer_error("signing device unavailable"));
        }
        if unsigned.prevouts.len() != unsigned.tx.input.len() {
            return Err(signer_error(format!(
                "{} prevouts for {} inputs",
                unsigned.prevouts.len(),
                unsigned.tx.input.len()
            )));
        }

        let mut cache = SighashCache::new(&unsigned.tx);
        let mut witnesses = Vec::with_capacity(unsigned.prevouts.len());
        for (index, prevout) in unsigned.prevouts.iter().enumerate() {
            let witness = match (&unsigned.witness, index) {
                (Some(template), 0) => {
                    let script = template
                        .witness_script()
                        .ok_or_else(|| signer_error("witness template has no script"))?;
                    let sighash = cache
                        .p2wsh_signature_hash(
                            index,
                            Script::from_bytes(script),
                            prevout.value,
                            EcdsaSighashType::All,
                        )
                        .map_err(signer_error)?;
                    let signature = self.sign_digest(sighash.to_byte_array());
                    template.assemble(&signature.to_vec())
                }
                _ => {
                    let sighash = cache
                        .p2wpkh_signature_hash(
                            index,
                            &prevout.script_pubkey,
                            prevout.value,
                            EcdsaSighashType::All,
                        )
                        .map_err(signer_error)?;
                    let signature = self.sign_digest(sighash.to_byte_array());
                    let mut witness = Witness::new();
                    witness.push(signature.to_vec());
                    witness.push(self.public_key.serialize());
                    witness
                }
            };
            witnesses.push(witness);
        }

        let mut tx = unsigned.tx.clone();
        for (input, witness) in tx.input.iter_mut().zip(witnesses) {
            input.witness = witness;
        }
        debug!(kind = ?unsigned.kind, txid = %tx.compute_txid(), "[swap] transaction signed");
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{build_claim, build_funding, build_script, generate, witness_address};
    use crate::domain::{HtlcParameters, Network, SwapInstance, Utxo};
    use bitcoin::Txid;

    fn signer() -> LocalKeySigner {
        LocalKeySigner::new(&[0x11; 32]).unwrap()
    }

    #[test]
    fn test_rejects_invalid_key() {
        assert!(LocalKeySigner::new(&[0u8; 32]).is_err());
        assert!(LocalKeySigner::new(&[1u8; 16]).is_err());
    }

    #[tokio::test]
    async fn test_signs_claim_with_template() {
        let signer = signer();
        let record = generate().unwrap();
        let params = HtlcParameters::new(
            50_000,
            record.hash(),
            &signer.pubkey_bytes(),
            &signer.pubkey_bytes(),
            144,
            Network::BitcoinTestnet,
        )
        .unwrap();
        let mut swap = SwapInstance::new(build_script(&params).unwrap());
        let funding_txid = Txid::from_byte_array([3; 32]);
        swap.mark_funded(funding_txid, 0, 100).unwrap();
        let utxo = Utxo {
            txid: funding_txid,
            vout: 0,
            amount: 50_000,
            script_pubkey: swap.script().script_pubkey(),
            confirmations: 1,
        };
        let dest = witness_address(&[9; 32], Network::BitcoinTestnet).unwrap();
        let unsigned = build_claim(&swap, &utxo, record.secret(), &dest, 500).unwrap();

        let signed = signer.sign(&unsigned).await.unwrap();
        let items: Vec<&[u8]> = signed.input[0].witness.iter().collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items[1], record.secret().as_bytes());
        assert_eq!(items[3], swap.script().script_bytes());
        assert_eq!(signed.compute_txid(), unsigned.txid());

        // Signature verifies against the P2WSH sighash.
        let sig = ecdsa::Signature::from_slice(items[0]).unwrap();
        let sighash = SighashCache::new(&unsigned.tx)
            .p2wsh_signature_hash(
                0,
                swap.script().script(),
                bitcoin::Amount::from_sat(50_000),
                EcdsaSighashType::All,
            )
            .unwrap();
        let msg = Message::from_digest(sighash.to_byte_array());
        assert!(signer
            .secp
            .verify_ecdsa(&msg, &sig.signature, &signer.public_key)
            .is_ok());
    }

    #[tokio::test]
    async fn test_signs_wallet_inputs() {
        let signer = signer();
        let record = generate().unwrap();
        let params = HtlcParameters::new(
            50_000,
            record.hash(),
            &signer.pubkey_bytes(),
            &signer.pubkey_bytes(),
            144,
            Network::BitcoinTestnet,
        )
        .unwrap();
        let script = build_script(&params).unwrap();
        let utxos = vec![Utxo {
            txid: Txid::from_byte_array([4; 32]),
            vout: 1,
            amount: 80_000,
            script_pubkey: signer.wallet_script_pubkey(),
            confirmations: 3,
        }];
        let change = witness_address(&[8; 32], Network::BitcoinTestnet).unwrap();
        let unsigned = build_funding(&script, &utxos, &change, 2).unwrap();
        let signed = signer.sign(&unsigned).await.unwrap();
        assert_eq!(signed.input[0].witness.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_tagged_signer() {
        let signer = signer();
        signer.set_fail(true);
        let unsigned = UnsignedTransaction {
            kind: crate::domain::SpendKind::Funding,
            tx: Transaction {
                version: bitcoin::transaction::Version::TWO,
                lock_time: bitcoin::absolute::LockTime::ZERO,
                input: vec![],
                output: vec![],
            },
            prevouts: vec![],
            witness: None,
            fee: 0,
            change: None,
        };
        let err = signer.sign(&unsigned).await.unwrap_err();
        assert_eq!(err.origin(), Some(ExternalOrigin::Signer));
    }
}
