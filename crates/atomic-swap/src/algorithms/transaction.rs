//! # Transaction Engine
//!
//! Builds unsigned funding, claim and refund transactions.
//!
//! Building is pure: nothing here talks to a node or holds a key. The
//! output is an [`UnsignedTransaction`] carrying the witness shape the
//! external signer must fill in.
//!
//! ## Sequence numbers
//!
//! | Spend  | Input sequence       | Why it matters                    |
//! |--------|----------------------|-----------------------------------|
//! | Claim  | `0xFFFFFFFE`         | relative locktime disabled        |
//! | Refund | HTLC `timeout`       | satisfies `OP_CHECKSEQUENCEVERIFY` |
//! | Funding| `0xFFFFFFFD`         | replaceable wallet inputs          |

use super::script::address_to_script_pubkey;
use crate::domain::{
    invariant_above_dust, CompiledHtlcScript, Preimage, SpendKind, SwapError, SwapInstance,
    UnsignedTransaction, Utxo, WitnessTemplate, CLAIM_SEQUENCE, DUST_LIMIT,
};
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use tracing::debug;

/// Estimated vbytes per wallet input.
pub const INPUT_VBYTES: u64 = 148;

/// Estimated vbytes per output.
pub const OUTPUT_VBYTES: u64 = 31;

/// Estimated fixed transaction overhead in vbytes.
pub const TX_OVERHEAD_VBYTES: u64 = 10;

/// Index of the HTLC output in a funding transaction.
pub const HTLC_OUTPUT_INDEX: u32 = 0;

/// Estimated funding fee: HTLC output plus change output.
pub fn estimate_funding_fee(input_count: usize, fee_rate: u64) -> u64 {
    let vbytes = input_count as u64 * INPUT_VBYTES + 2 * OUTPUT_VBYTES + TX_OVERHEAD_VBYTES;
    vbytes.saturating_mul(fee_rate)
}

fn amount_overflow() -> SwapError {
    SwapError::InvalidParameter("UTXO amounts overflow a u64".into())
}

fn unsigned_input(utxo: &Utxo, sequence: Sequence) -> TxIn {
    TxIn {
        previous_output: utxo.outpoint(),
        script_sig: ScriptBuf::new(),
        sequence,
        witness: Witness::new(),
    }
}

fn v2_transaction(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}

/// Build the funding transaction paying `amount` to the HTLC address.
///
/// Change below or at the dust limit is left to the fee.
pub fn build_funding(
    script: &CompiledHtlcScript,
    utxos: &[Utxo],
    change_address: &str,
    fee_rate: u64,
) -> Result<UnsignedTransaction, SwapError> {
    if utxos.is_empty() {
        return Err(SwapError::InvalidParameter("no UTXOs provided".into()));
    }
    let amount = script.params().amount();
    let total_input = utxos
        .iter()
        .try_fold(0u64, |acc, u| acc.checked_add(u.amount))
        .ok_or_else(amount_overflow)?;
    let estimated_fee = estimate_funding_fee(utxos.len(), fee_rate);
    let needed = amount.saturating_add(estimated_fee);
    if total_input < needed {
        return Err(SwapError::InsufficientFunds {
            needed,
            available: total_input,
        });
    }

    let mut output = vec![TxOut {
        value: Amount::from_sat(amount),
        script_pubkey: script.script_pubkey(),
    }];
    let change_amount = total_input - needed;
    let change = if change_amount > DUST_LIMIT {
        let change_spk = address_to_script_pubkey(change_address, script.params().network())?;
        output.push(TxOut {
            value: Amount::from_sat(change_amount),
            script_pubkey: change_spk,
        });
        Some(change_amount)
    } else {
        debug!(change_amount, "[swap] change below dust, added to fee");
        None
    };

    let input = utxos
        .iter()
        .map(|u| unsigned_input(u, Sequence::ENABLE_RBF_NO_LOCKTIME))
        .collect();
    let tx = v2_transaction(input, output);
    let fee = total_input - amount - change.unwrap_or(0);

    debug!(
        address = script.address(),
        amount,
        fee,
        inputs = utxos.len(),
        "[swap] built funding transaction"
    );

    Ok(UnsignedTransaction {
        kind: SpendKind::Funding,
        tx,
        prevouts: utxos.iter().map(Utxo::to_txout).collect(),
        witness: None,
        fee,
        change,
    })
}

/// The HTLC output must be the one this swap locked.
fn check_htlc_utxo(swap: &SwapInstance, utxo: &Utxo) -> Result<(), SwapError> {
    if utxo.script_pubkey != swap.script().script_pubkey() {
        return Err(SwapError::InvalidParameter(format!(
            "UTXO {}:{} does not pay to the HTLC script",
            utxo.txid, utxo.vout
        )));
    }
    if let Some(funding) = swap.state().funding() {
        if funding.txid != utxo.txid || funding.vout != utxo.vout {
            return Err(SwapError::InvalidParameter(format!(
                "UTXO {}:{} is not the funding output {}:{}",
                utxo.txid, utxo.vout, funding.txid, funding.vout
            )));
        }
    }
    Ok(())
}

/// Build the claim transaction spending the HTLC via the hash branch.
///
/// Witness to attach: `[signature, preimage, 0x01, script]`.
pub fn build_claim(
    swap: &SwapInstance,
    htlc_utxo: &Utxo,
    secret: &Preimage,
    destination: &str,
    fee: u64,
) -> Result<UnsignedTransaction, SwapError> {
    swap.can_claim(secret)?;
    check_htlc_utxo(swap, htlc_utxo)?;
    let value = invariant_above_dust(htlc_utxo.amount, fee)?;
    let destination_spk = address_to_script_pubkey(destination, swap.params().network())?;

    let tx = v2_transaction(
        vec![unsigned_input(htlc_utxo, CLAIM_SEQUENCE)],
        vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: destination_spk,
        }],
    );

    debug!(
        payment_hash = %swap.payment_hash(),
        value,
        fee,
        "[swap] built claim transaction"
    );

    Ok(UnsignedTransaction {
        kind: SpendKind::Claim,
        tx,
        prevouts: vec![htlc_utxo.to_txout()],
        witness: Some(WitnessTemplate::claim(secret.clone(), swap.script().script())),
        fee,
        change: None,
    })
}

/// Build the refund transaction spending the HTLC via the timeout branch.
///
/// The input sequence is set to the HTLC timeout so `OP_CSV` passes.
/// Witness to attach: `[signature, <empty>, script]`.
pub fn build_refund(
    swap: &SwapInstance,
    htlc_utxo: &Utxo,
    refund_address: &str,
    fee: u64,
    current_height: u64,
    require_safety_margin: bool,
) -> Result<UnsignedTransaction, SwapError> {
    swap.can_refund(current_height, require_safety_margin)?;
    check_htlc_utxo(swap, htlc_utxo)?;
    let value = invariant_above_dust(htlc_utxo.amount, fee)?;
    let refund_spk = address_to_script_pubkey(refund_address, swap.params().network())?;
    let timeout = swap.params().timeout();

    let tx = v2_transaction(
        vec![unsigned_input(htlc_utxo, Sequence::from_height(timeout))],
        vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: refund_spk,
        }],
    );

    debug!(
        payment_hash = %swap.payment_hash(),
        value,
        fee,
        timeout,
        "[swap] built refund transaction"
    );

    Ok(UnsignedTransaction {
        kind: SpendKind::Refund,
        tx,
        prevouts: vec![htlc_utxo.to_txout()],
        witness: Some(WitnessTemplate::refund(swap.script().script())),
        fee,
        change: None,
    })
}

/// Largest-first UTXO selection.
///
/// Returns the chosen UTXOs and the leftover above `target + fee_estimate`.
pub fn select_utxos(
    available: &[Utxo],
    target: u64,
    fee_estimate: u64,
) -> Result<(Vec<Utxo>, u64), SwapError> {
    let needed = target.saturating_add(fee_estimate);
    let mut sorted: Vec<&Utxo> = available.iter().collect();
    sorted.sort_by(|a, b| b.amount.cmp(&a.amount));

    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in sorted {
        selected.push(utxo.clone());
        total = total.checked_add(utxo.amount).ok_or_else(amount_overflow)?;
        if total >= needed {
            return Ok((selected, total - needed));
        }
    }
    Err(SwapError::InsufficientFunds {
        needed,
        available: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{build_script, preimage, witness_address};
    use crate::domain::{
        invariant_claim_sequence, invariant_refund_sequence, HtlcParameters, Network,
    };
    use bitcoin::hashes::Hash as _;
    use bitcoin::Txid;

    fn key(prefix: u8, fill: u8) -> Vec<u8> {
        let mut k = vec![fill; 33];
        k[0] = prefix;
        k
    }

    fn wallet_address(fill: u8) -> String {
        witness_address(&[fill; 32], Network::BitcoinTestnet).unwrap()
    }

    fn wallet_utxo(fill: u8, amount: u64) -> Utxo {
        Utxo {
            txid: Txid::from_byte_array([fill; 32]),
            vout: 0,
            amount,
            script_pubkey: ScriptBuf::new(),
            confirmations: 6,
        }
    }

    fn funded_swap() -> (SwapInstance, Preimage, Utxo) {
        let record = preimage::generate().unwrap();
        let params = HtlcParameters::new(
            100_000,
            record.hash(),
            &key(0x02, 0x11),
            &key(0x03, 0x22),
            144,
            Network::BitcoinTestnet,
        )
        .unwrap();
        let mut swap = SwapInstance::new(build_script(&params).unwrap());
        let funding_txid = Txid::from_byte_array([0xF0; 32]);
        swap.mark_funded(funding_txid, 0, 700_000).unwrap();
        let utxo = Utxo {
            txid: funding_txid,
            vout: 0,
            amount: 100_000,
            script_pubkey: swap.script().script_pubkey(),
            confirmations: 1,
        };
        (swap, record.secret().clone(), utxo)
    }

    #[test]
    fn test_funding_fee_estimate() {
        assert_eq!(estimate_funding_fee(1, 10), (148 + 31 + 31 + 10) * 10);
        assert_eq!(estimate_funding_fee(3, 1), 3 * 148 + 72);
    }

    #[test]
    fn test_build_funding_with_change() {
        let (swap, _, _) = funded_swap();
        let utxos = vec![wallet_utxo(1, 200_000)];
        let tx = build_funding(swap.script(), &utxos, &wallet_address(9), 10).unwrap();
        let fee = estimate_funding_fee(1, 10);
        assert_eq!(tx.kind, SpendKind::Funding);
        assert_eq!(tx.tx.output.len(), 2);
        assert_eq!(tx.tx.output[HTLC_OUTPUT_INDEX as usize].value.to_sat(), 100_000);
        assert_eq!(
            tx.tx.output[HTLC_OUTPUT_INDEX as usize].script_pubkey,
            swap.script().script_pubkey()
        );
        assert_eq!(tx.change, Some(200_000 - 100_000 - fee));
        assert_eq!(tx.fee, fee);
        assert!(tx.needs_witness());
        assert_eq!(tx.prevouts.len(), 1);
    }

    #[test]
    fn test_build_funding_dust_change_absorbed() {
        let (swap, _, _) = funded_swap();
        let fee = estimate_funding_fee(1, 10);
        let utxos = vec![wallet_utxo(1, 100_000 + fee + 546)];
        let tx = build_funding(swap.script(), &utxos, &wallet_address(9), 10).unwrap();
        assert_eq!(tx.tx.output.len(), 1);
        assert_eq!(tx.change, None);
        assert_eq!(tx.fee, fee + 546);
    }

    #[test]
    fn test_build_funding_insufficient() {
        let (swap, _, _) = funded_swap();
        let utxos = vec![wallet_utxo(1, 100_000)];
        assert!(matches!(
            build_funding(swap.script(), &utxos, &wallet_address(9), 10),
            Err(SwapError::InsufficientFunds { available: 100_000, .. })
        ));
        assert!(matches!(
            build_funding(swap.script(), &[], &wallet_address(9), 10),
            Err(SwapError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_claim_sequence_and_witness() {
        let (swap, secret, utxo) = funded_swap();
        let tx = build_claim(&swap, &utxo, &secret, &wallet_address(3), 1_000).unwrap();
        assert_eq!(tx.tx.input[0].sequence, Sequence(0xFFFF_FFFE));
        assert!(invariant_claim_sequence(&tx.tx));
        assert_eq!(tx.tx.output[0].value.to_sat(), 99_000);
        assert_eq!(tx.tx.version, Version::TWO);
        let template = tx.witness.as_ref().unwrap();
        assert_eq!(template.elements.len(), 4);
        assert_eq!(template.witness_script(), Some(swap.script().script_bytes()));
    }

    #[test]
    fn test_claim_wrong_secret_rejected() {
        let (swap, _, utxo) = funded_swap();
        assert!(matches!(
            build_claim(&swap, &utxo, &Preimage::new([0; 32]), &wallet_address(3), 1_000),
            Err(SwapError::PreimageMismatch)
        ));
    }

    #[test]
    fn test_claim_dust_rejected() {
        let (swap, secret, utxo) = funded_swap();
        assert!(matches!(
            build_claim(&swap, &utxo, &secret, &wallet_address(3), 99_454),
            Err(SwapError::DustOutput { value: 546, .. })
        ));
    }

    #[test]
    fn test_claim_foreign_utxo_rejected() {
        let (swap, secret, mut utxo) = funded_swap();
        utxo.vout = 1;
        assert!(matches!(
            build_claim(&swap, &utxo, &secret, &wallet_address(3), 1_000),
            Err(SwapError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_refund_sequence_equals_timeout() {
        let (swap, _, utxo) = funded_swap();
        let tx = build_refund(&swap, &utxo, &wallet_address(4), 1_000, 700_150, true).unwrap();
        assert_eq!(tx.tx.input[0].sequence, Sequence(144));
        assert!(invariant_refund_sequence(&tx.tx, 144));
        assert_eq!(tx.witness.as_ref().unwrap().elements.len(), 3);
        assert_eq!(tx.kind, SpendKind::Refund);
    }

    #[test]
    fn test_refund_before_timeout_rejected() {
        let (swap, _, utxo) = funded_swap();
        assert!(matches!(
            build_refund(&swap, &utxo, &wallet_address(4), 1_000, 700_143, false),
            Err(SwapError::TimeoutNotReached { .. })
        ));
        assert!(matches!(
            build_refund(&swap, &utxo, &wallet_address(4), 1_000, 700_145, true),
            Err(SwapError::SafetyMarginNotReached { .. })
        ));
    }

    #[test]
    fn test_build_funding_rejects_overflowing_inputs() {
        let (swap, _, _) = funded_swap();
        let half = u64::MAX / 2 + 1;
        let utxos = vec![wallet_utxo(1, half), wallet_utxo(2, half)];
        assert!(matches!(
            build_funding(swap.script(), &utxos, &wallet_address(9), 10),
            Err(SwapError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_select_rejects_overflowing_inputs() {
        let half = u64::MAX / 2 + 1;
        let utxos = vec![wallet_utxo(1, half), wallet_utxo(2, half)];
        assert!(matches!(
            select_utxos(&utxos, u64::MAX - 1, 0),
            Err(SwapError::InvalidParameter(_))
        ));
        // One large UTXO already covers a small target.
        let (selected, _) = select_utxos(&utxos, 20_000, 1_000).unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_select_largest_first() {
        let utxos = vec![
            wallet_utxo(1, 10_000),
            wallet_utxo(2, 50_000),
            wallet_utxo(3, 30_000),
        ];
        let (selected, change) = select_utxos(&utxos, 60_000, 1_000).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].amount, 50_000);
        assert_eq!(selected[1].amount, 30_000);
        assert_eq!(change, 19_000);
    }

    #[test]
    fn test_select_insufficient() {
        let utxos = vec![wallet_utxo(1, 10_000), wallet_utxo(2, 5_000)];
        assert!(matches!(
            select_utxos(&utxos, 20_000, 1_000),
            Err(SwapError::InsufficientFunds {
                needed: 21_000,
                available: 15_000
            })
        ));
    }
}
