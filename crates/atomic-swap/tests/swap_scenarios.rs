//! # End-to-End Swap Scenarios
//!
//! Drives `SwapService` against the in-memory ledger, Lightning node and
//! local signer.
//!
//! ## Test Categories
//!
//! 1. **Claim path** - fund, claim, no refund afterwards
//! 2. **Refund path** - timeout and reorg margin boundaries
//! 3. **Sequence numbers** - claim and refund inputs on the wire
//! 4. **Lightning settlement** - invoice settles, preimage feeds the claim
//! 5. **Concurrency** - racing claim and refund, first writer wins

use atomic_swap::{
    invariant_claim_sequence, invariant_refund_sequence, verify, witness_address,
    CompressedPubkey, InMemoryLedger, InMemoryLightningNode, LedgerNode, LocalKeySigner, Network,
    PaymentHash, SettlementMonitor, SwapApi, SwapConfig, SwapError, SwapInstance, SwapService,
    SwapStatus, Utxo,
};
use bitcoin::hashes::Hash as _;
use bitcoin::Txid;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// =============================================================================
// TEST HELPERS
// =============================================================================

const FUNDING_HEIGHT: u64 = 700_000;
const TIMEOUT: u32 = 144;

type Service = SwapService<InMemoryLedger, LocalKeySigner, InMemoryLightningNode>;

struct Party {
    service: Arc<Service>,
    ledger: Arc<InMemoryLedger>,
    signer: Arc<LocalKeySigner>,
}

fn party(key: u8, lightning: &Arc<InMemoryLightningNode>) -> Party {
    let ledger = Arc::new(InMemoryLedger::new(FUNDING_HEIGHT));
    let signer = Arc::new(LocalKeySigner::new(&[key; 32]).unwrap());
    let service = Arc::new(SwapService::new(
        SwapConfig::for_testing(),
        Arc::clone(&ledger),
        Arc::clone(&signer),
        Arc::clone(lightning),
    ));
    Party {
        service,
        ledger,
        signer,
    }
}

fn pubkey(party: &Party) -> CompressedPubkey {
    CompressedPubkey::from_slice(&party.signer.pubkey_bytes()).unwrap()
}

fn address(fill: u8) -> String {
    witness_address(&[fill; 32], Network::BitcoinTestnet).unwrap()
}

/// Fund from the party's wallet and confirm at `FUNDING_HEIGHT`.
async fn fund(party: &Party, payment_hash: &PaymentHash) -> Txid {
    party.ledger.add_utxo(Utxo {
        txid: Txid::from_byte_array([0xF0; 32]),
        vout: 1,
        amount: 250_000,
        script_pubkey: party.signer.wallet_script_pubkey(),
        confirmations: 6,
    });
    let txid = assert_ok!(party.service.fund_swap(payment_hash, &address(0xC0)).await);
    assert_ok!(
        party
            .service
            .confirm_funding(payment_hash, txid, 0, FUNDING_HEIGHT)
            .await
    );
    txid
}

async fn funded_swap(party: &Party) -> (SwapInstance, atomic_swap::PreimageRecord) {
    let key = pubkey(party);
    let (swap, record) = assert_ok!(
        party
            .service
            .initiate_swap(100_000, key, key, TIMEOUT)
            .await
    );
    fund(party, swap.payment_hash()).await;
    (swap, record)
}

// =============================================================================
// CLAIM PATH
// =============================================================================

#[tokio::test]
async fn test_claim_then_refund_rejected() {
    let lightning = Arc::new(InMemoryLightningNode::new());
    let alice = party(0x11, &lightning);
    let (swap, record) = funded_swap(&alice).await;
    let hash = *swap.payment_hash();

    let funded = alice.service.get_swap(&hash).unwrap();
    assert_eq!(funded.status(), SwapStatus::Funded);
    assert_ok!(funded.can_claim(record.secret()));

    assert_ok!(alice.service.claim_swap(&hash, record.secret(), &address(1)).await);
    let claimed = alice.service.get_swap(&hash).unwrap();
    assert_eq!(claimed.status(), SwapStatus::Claimed);
    assert!(!alice.service.preimage_store().contains(&hash));

    alice.ledger.set_height(FUNDING_HEIGHT + 1_000);
    let err = assert_err!(alice.service.refund_swap(&hash, &address(2)).await);
    assert!(matches!(
        err,
        SwapError::InvalidStateTransition {
            reason: "HTLC already claimed",
            ..
        }
    ));
}

#[tokio::test]
async fn test_claim_with_wrong_secret_rejected() {
    let lightning = Arc::new(InMemoryLightningNode::new());
    let alice = party(0x11, &lightning);
    let (swap, _) = funded_swap(&alice).await;
    let other = atomic_swap::generate().unwrap();

    let err = assert_err!(
        alice
            .service
            .claim_swap(swap.payment_hash(), other.secret(), &address(1))
            .await
    );
    assert!(matches!(err, SwapError::PreimageMismatch));
    assert_eq!(
        alice.service.get_swap(swap.payment_hash()).unwrap().status(),
        SwapStatus::Funded
    );
}

// =============================================================================
// REFUND PATH
// =============================================================================

#[tokio::test]
async fn test_refund_timing_boundaries() {
    let lightning = Arc::new(InMemoryLightningNode::new());
    let alice = party(0x11, &lightning);
    let (swap, _) = funded_swap(&alice).await;
    let hash = *swap.payment_hash();

    alice.ledger.set_height(FUNDING_HEIGHT + u64::from(TIMEOUT) - 1);
    let err = assert_err!(alice.service.refund_swap(&hash, &address(2)).await);
    assert!(matches!(err, SwapError::TimeoutNotReached { remaining: 1, .. }));

    alice.ledger.set_height(FUNDING_HEIGHT + u64::from(TIMEOUT) + 5);
    let err = assert_err!(alice.service.refund_swap(&hash, &address(2)).await);
    assert!(matches!(err, SwapError::SafetyMarginNotReached { remaining: 1, .. }));
    assert_eq!(alice.ledger.broadcasts().len(), 1);

    alice.ledger.set_height(FUNDING_HEIGHT + u64::from(TIMEOUT) + 6);
    assert_ok!(alice.service.refund_swap(&hash, &address(2)).await);
    assert_eq!(
        alice.service.get_swap(&hash).unwrap().status(),
        SwapStatus::Refunded
    );
    assert!(!alice.service.preimage_store().contains(&hash));
}

#[tokio::test]
async fn test_refund_after_expiry_sweep() {
    let lightning = Arc::new(InMemoryLightningNode::new());
    let alice = party(0x11, &lightning);
    let (swap, _) = funded_swap(&alice).await;
    let hash = *swap.payment_hash();

    alice.ledger.set_height(FUNDING_HEIGHT + 200);
    assert_eq!(assert_ok!(alice.service.sweep_expired().await), vec![hash]);
    assert_eq!(assert_ok!(alice.service.refundable_swaps().await), vec![hash]);
    assert_ok!(alice.service.refund_swap(&hash, &address(2)).await);
    assert!(assert_ok!(alice.service.refundable_swaps().await).is_empty());
}

#[tokio::test]
async fn test_refund_without_margin_policy() {
    let lightning = Arc::new(InMemoryLightningNode::new());
    let ledger = Arc::new(InMemoryLedger::new(FUNDING_HEIGHT));
    let signer = Arc::new(LocalKeySigner::new(&[0x33; 32]).unwrap());
    let config = SwapConfig {
        require_refund_margin: false,
        ..SwapConfig::for_testing()
    };
    let alice = Party {
        service: Arc::new(SwapService::new(
            config,
            Arc::clone(&ledger),
            Arc::clone(&signer),
            Arc::clone(&lightning),
        )),
        ledger,
        signer,
    };
    let (swap, _) = funded_swap(&alice).await;

    alice.ledger.set_height(FUNDING_HEIGHT + u64::from(TIMEOUT));
    assert_ok!(alice.service.refund_swap(swap.payment_hash(), &address(2)).await);
}

// =============================================================================
// SEQUENCE NUMBERS
// =============================================================================

#[tokio::test]
async fn test_broadcast_sequences() {
    let lightning = Arc::new(InMemoryLightningNode::new());
    let alice = party(0x11, &lightning);

    let (claim_swap, claim_record) = funded_swap(&alice).await;
    assert_ok!(
        alice
            .service
            .claim_swap(claim_swap.payment_hash(), claim_record.secret(), &address(1))
            .await
    );
    let claim_tx = alice.ledger.broadcasts().last().cloned().unwrap();
    assert!(invariant_claim_sequence(&claim_tx));
    assert_eq!(claim_tx.input[0].sequence.0, 0xFFFF_FFFE);

    let (refund_swap, _) = funded_swap(&alice).await;
    alice.ledger.set_height(FUNDING_HEIGHT + 500);
    assert_ok!(
        alice
            .service
            .refund_swap(refund_swap.payment_hash(), &address(2))
            .await
    );
    let refund_tx = alice.ledger.broadcasts().last().cloned().unwrap();
    assert!(invariant_refund_sequence(&refund_tx, TIMEOUT as u16));
    assert_eq!(refund_tx.input[0].sequence.0, 144);

    // Witness layouts.
    assert_eq!(claim_tx.input[0].witness.len(), 4);
    assert_eq!(refund_tx.input[0].witness.len(), 3);
    assert!(refund_tx.input[0].witness.nth(1).unwrap().is_empty());
}

// =============================================================================
// LIGHTNING SETTLEMENT
// =============================================================================

#[tokio::test]
async fn test_invoice_settlement_enables_claim() {
    let lightning = Arc::new(InMemoryLightningNode::new());
    let alice = party(0x11, &lightning);
    let bob = party(0x22, &lightning);

    // Alice holds the secret and locks funds to Bob.
    let (swap, record) = assert_ok!(
        alice
            .service
            .initiate_swap(100_000, pubkey(&bob), pubkey(&alice), TIMEOUT)
            .await
    );
    let hash = *swap.payment_hash();
    let invoice = assert_ok!(alice.service.create_invoice(&hash, 100_000, "swap").await);
    assert_eq!(invoice.payment_hash, *record.hash());

    // Bob tracks the same HTLC from its public parameters.
    assert_ok!(bob.service.register_swap(swap.params().clone()).await);
    assert_eq!(
        bob.service.get_swap(&hash).unwrap().script().address(),
        swap.script().address()
    );
    assert_ok!(
        bob.service
            .confirm_funding(&hash, Txid::from_byte_array([0xAB; 32]), 0, FUNDING_HEIGHT)
            .await
    );

    let payer = {
        let lightning = Arc::clone(&lightning);
        let secret = record.secret().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            lightning.settle(&secret).unwrap();
        })
    };
    let revealed = assert_ok!(bob.service.await_preimage(&hash).await);
    payer.await.unwrap();

    assert!(verify(revealed.as_bytes(), record.hash()));
    assert_ok!(bob.service.get_swap(&hash).unwrap().can_claim(&revealed));
    assert_ok!(bob.service.claim_swap(&hash, &revealed, &address(3)).await);
    assert_eq!(bob.service.get_swap(&hash).unwrap().status(), SwapStatus::Claimed);
}

#[tokio::test]
async fn test_settlement_times_out_inconclusively() {
    let lightning = Arc::new(InMemoryLightningNode::new());
    let alice = party(0x11, &lightning);
    let (swap, _) = funded_swap(&alice).await;
    let hash = *swap.payment_hash();
    assert_ok!(alice.service.create_invoice(&hash, 100_000, "").await);

    let err = assert_err!(alice.service.await_preimage(&hash).await);
    assert!(matches!(err, SwapError::SettlementTimeout { .. }));
    assert_eq!(
        alice.service.get_swap(&hash).unwrap().status(),
        SwapStatus::Funded
    );
}

#[tokio::test]
async fn test_monitor_feeds_claim() {
    let lightning = Arc::new(InMemoryLightningNode::new());
    let alice = party(0x11, &lightning);
    let monitor = SettlementMonitor::spawn(Arc::clone(&lightning), &SwapConfig::for_testing());
    let (swap, record) = funded_swap(&alice).await;
    let hash = *swap.payment_hash();
    assert_ok!(alice.service.create_invoice(&hash, 100_000, "").await);

    let watch = assert_ok!(monitor.watch(*record.hash()).await);
    lightning.disconnect_subscribers();
    lightning.settle(record.secret()).unwrap();

    let revealed = tokio::time::timeout(Duration::from_secs(2), watch.wait())
        .await
        .unwrap()
        .unwrap();
    assert_ok!(alice.service.claim_swap(&hash, &revealed, &address(4)).await);
    assert!(assert_ok!(monitor.active_watches().await).is_empty());
    monitor.shutdown().await;
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claim_refund_race_single_winner() {
    let lightning = Arc::new(InMemoryLightningNode::new());
    let alice = party(0x11, &lightning);

    for _ in 0..8 {
        alice.ledger.set_height(FUNDING_HEIGHT);
        let (swap, record) = funded_swap(&alice).await;
        let hash = *swap.payment_hash();
        alice.ledger.set_height(FUNDING_HEIGHT + 500);

        let claimer = {
            let service = Arc::clone(&alice.service);
            let secret = record.secret().clone();
            tokio::spawn(async move { service.claim_swap(&hash, &secret, &address(1)).await })
        };
        let refunder = {
            let service = Arc::clone(&alice.service);
            tokio::spawn(async move { service.refund_swap(&hash, &address(2)).await })
        };
        let claim = claimer.await.unwrap();
        let refund = refunder.await.unwrap();

        assert!(claim.is_ok() != refund.is_ok(), "exactly one spend must win");
        let loser = claim.as_ref().err().or(refund.as_ref().err()).unwrap();
        assert!(matches!(loser, SwapError::InvalidStateTransition { .. }));

        let expected = if claim.is_ok() {
            SwapStatus::Claimed
        } else {
            SwapStatus::Refunded
        };
        assert_eq!(alice.service.get_swap(&hash).unwrap().status(), expected);
    }
    assert_eq!(assert_ok!(alice.ledger.block_height().await), FUNDING_HEIGHT + 500);
}
