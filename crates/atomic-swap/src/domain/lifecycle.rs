//! # Swap Lifecycle
//!
//! State machine for one HTLC instance.
//!
//! ```text
//! Created ──► Funded ──┬──► Claimed
//!                      ├──► Expired ──► Refunded
//!                      └──────────────► Refunded
//! ```
//!
//! `Claimed` and `Refunded` are terminal. Each state variant carries only
//! the data that exists in that state, so a claim txid cannot be read off
//! a refunded swap. Every `mark_*` method re-runs its precondition check
//! and leaves the instance untouched on failure.

use super::entities::{CompiledHtlcScript, HtlcParameters};
use super::errors::SwapError;
use super::secure_secret::Preimage;
use super::value_objects::{PaymentHash, SwapStatus};
use crate::algorithms::preimage;
use bitcoin::Txid;
use serde::Serialize;
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use uuid::Uuid;

/// Seconds since the Unix epoch.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Where and when the HTLC output was confirmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FundingInfo {
    /// Funding transaction id.
    pub txid: Txid,
    /// HTLC output index.
    pub vout: u32,
    /// Confirmation height.
    pub height: u64,
    /// `height + timeout`.
    pub expiry_height: u64,
    /// Unix timestamp of `mark_funded`.
    pub funded_at: u64,
}

/// Lifecycle state with per-state data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwapState {
    /// Script built, nothing on chain yet.
    Created,
    /// HTLC output confirmed.
    Funded {
        /// Funding details.
        funding: FundingInfo,
    },
    /// Claimed via the hash branch.
    Claimed {
        /// Funding details.
        funding: FundingInfo,
        /// Claim transaction id.
        claim_txid: Txid,
        /// Unix timestamp.
        claimed_at: u64,
    },
    /// Timeout reached, not yet refunded.
    Expired {
        /// Funding details.
        funding: FundingInfo,
        /// Height at which expiry was recorded.
        expired_at_height: u64,
    },
    /// Refunded via the timeout branch.
    Refunded {
        /// Funding details.
        funding: FundingInfo,
        /// Refund transaction id.
        refund_txid: Txid,
        /// Unix timestamp.
        refunded_at: u64,
    },
}

impl SwapState {
    /// Status tag.
    pub fn status(&self) -> SwapStatus {
        match self {
            SwapState::Created => SwapStatus::Created,
            SwapState::Funded { .. } => SwapStatus::Funded,
            SwapState::Claimed { .. } => SwapStatus::Claimed,
            SwapState::Expired { .. } => SwapStatus::Expired,
            SwapState::Refunded { .. } => SwapStatus::Refunded,
        }
    }

    /// Funding details, once funded.
    pub fn funding(&self) -> Option<&FundingInfo> {
        match self {
            SwapState::Created => None,
            SwapState::Funded { funding }
            | SwapState::Claimed { funding, .. }
            | SwapState::Expired { funding, .. }
            | SwapState::Refunded { funding, .. } => Some(funding),
        }
    }
}

/// Outcome of a successful [`SwapInstance::validate_timeout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TimeoutReport {
    /// Expiry height (actual or estimated).
    pub expiry_height: u64,
    /// Blocks until expiry.
    pub blocks_remaining: u64,
    /// Estimated seconds until expiry at the nominal block interval.
    pub estimated_secs: u64,
    /// True when computed from the current height because the swap is
    /// not funded yet.
    pub estimated: bool,
}

/// One HTLC's lifecycle record.
#[derive(Clone, Debug)]
pub struct SwapInstance {
    id: Uuid,
    script: CompiledHtlcScript,
    state: SwapState,
    created_at: u64,
}

impl SwapInstance {
    /// New instance in `Created`.
    pub fn new(script: CompiledHtlcScript) -> Self {
        Self {
            id: Uuid::new_v4(),
            script,
            state: SwapState::Created,
            created_at: now_secs(),
        }
    }

    /// Correlation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Compiled script.
    pub fn script(&self) -> &CompiledHtlcScript {
        &self.script
    }

    /// Parameters.
    pub fn params(&self) -> &HtlcParameters {
        self.script.params()
    }

    /// Payment hash.
    pub fn payment_hash(&self) -> &PaymentHash {
        self.script.params().payment_hash()
    }

    /// Current state.
    pub fn state(&self) -> &SwapState {
        &self.state
    }

    /// Current status tag.
    pub fn status(&self) -> SwapStatus {
        self.state.status()
    }

    /// Unix timestamp of creation.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Expiry height, once funded.
    pub fn expiry_height(&self) -> Option<u64> {
        self.state.funding().map(|f| f.expiry_height)
    }

    fn transition_error(&self, to: SwapStatus, reason: &'static str) -> SwapError {
        SwapError::InvalidStateTransition {
            from: self.status(),
            to,
            reason,
        }
    }

    /// Reject any move the status graph does not contain.
    fn ensure_transition(&self, to: SwapStatus) -> Result<(), SwapError> {
        let from = self.status();
        if from.can_transition_to(to) {
            return Ok(());
        }
        let reason = match (from, to) {
            (_, SwapStatus::Funded) => "HTLC already funded",
            (SwapStatus::Created, _) => "HTLC not funded yet",
            (SwapStatus::Claimed, _) => "HTLC already claimed",
            (SwapStatus::Refunded, _) => "HTLC already refunded",
            (SwapStatus::Expired, SwapStatus::Expired) => "HTLC already expired",
            (SwapStatus::Expired, _) => "HTLC expired",
            (SwapStatus::Funded, _) => "transition not allowed",
        };
        Err(self.transition_error(to, reason))
    }

    /// Record the confirmed funding output. Legal only from `Created`.
    pub fn mark_funded(&mut self, txid: Txid, vout: u32, height: u64) -> Result<(), SwapError> {
        self.ensure_transition(SwapStatus::Funded)?;
        let timeout = self.params().timeout();
        let expiry_height = height.checked_add(u64::from(timeout)).ok_or_else(|| {
            SwapError::InvalidParameter(format!(
                "funding height {height} plus timeout {timeout} overflows"
            ))
        })?;
        self.state = SwapState::Funded {
            funding: FundingInfo {
                txid,
                vout,
                height,
                expiry_height,
                funded_at: now_secs(),
            },
        };
        info!(
            payment_hash = %self.payment_hash(),
            %txid,
            height,
            expiry_height,
            "[swap] HTLC funded"
        );
        Ok(())
    }

    /// Check the timeout against network policy and the current height.
    ///
    /// Uses the funding height when known, else estimates expiry from
    /// `current_height`. The reorg-margin check runs only when
    /// `include_safety_margin` is set.
    pub fn validate_timeout(
        &self,
        current_height: u64,
        include_safety_margin: bool,
    ) -> Result<TimeoutReport, SwapError> {
        let profile = self.params().network().timing_profile();
        let timeout = u64::from(self.params().timeout());
        profile.check_timeout(u32::from(self.params().timeout()))?;

        let (expiry_height, estimated) = match self.state.funding() {
            Some(f) => (f.expiry_height, false),
            None => {
                let expiry = current_height.checked_add(timeout).ok_or_else(|| {
                    SwapError::InvalidParameter(format!(
                        "height {current_height} plus timeout {timeout} overflows"
                    ))
                })?;
                (expiry, true)
            }
        };
        if current_height >= expiry_height {
            return Err(SwapError::AlreadyExpired { expiry_height });
        }
        let blocks_remaining = expiry_height - current_height;
        if include_safety_margin && blocks_remaining < u64::from(profile.safety_margin) {
            return Err(SwapError::ExpiresTooSoon {
                remaining: blocks_remaining,
                margin: profile.safety_margin,
            });
        }
        Ok(TimeoutReport {
            expiry_height,
            blocks_remaining,
            estimated_secs: profile.estimate_secs(blocks_remaining),
            estimated,
        })
    }

    /// Check that `secret` unlocks the claim branch. Legal only from `Funded`.
    pub fn can_claim(&self, secret: &Preimage) -> Result<(), SwapError> {
        self.ensure_transition(SwapStatus::Claimed)?;
        if !preimage::verify_payment_hash(secret.as_bytes(), self.payment_hash()) {
            debug!(payment_hash = %self.payment_hash(), "[swap] preimage does not match");
            return Err(SwapError::PreimageMismatch);
        }
        Ok(())
    }

    /// Record the claim after re-validating with [`Self::can_claim`].
    pub fn mark_claimed(&mut self, txid: Txid, secret: &Preimage) -> Result<(), SwapError> {
        self.can_claim(secret)?;
        let SwapState::Funded { funding } = self.state else {
            return Err(self.transition_error(SwapStatus::Claimed, "HTLC not funded"));
        };
        self.state = SwapState::Claimed {
            funding,
            claim_txid: txid,
            claimed_at: now_secs(),
        };
        info!(payment_hash = %self.payment_hash(), %txid, "[swap] HTLC claimed");
        Ok(())
    }

    /// Check that the timeout branch is spendable at `current_height`.
    ///
    /// Legal from `Funded` or `Expired`. With `require_safety_margin` the
    /// network's reorg margin is added on top of the expiry height.
    pub fn can_refund(
        &self,
        current_height: u64,
        require_safety_margin: bool,
    ) -> Result<(), SwapError> {
        self.ensure_transition(SwapStatus::Refunded)?;
        let Some(funding) = self.state.funding() else {
            return Err(self.transition_error(SwapStatus::Refunded, "HTLC not funded yet"));
        };
        if current_height < funding.expiry_height {
            return Err(SwapError::TimeoutNotReached {
                remaining: funding.expiry_height - current_height,
                expiry_height: funding.expiry_height,
            });
        }
        if require_safety_margin {
            let margin = u64::from(self.params().network().timing_profile().safety_margin);
            let safe_height = funding.expiry_height.saturating_add(margin);
            if current_height < safe_height {
                return Err(SwapError::SafetyMarginNotReached {
                    remaining: safe_height - current_height,
                    safe_height,
                });
            }
        }
        Ok(())
    }

    /// Record the refund, requiring the reorg margin.
    pub fn mark_refunded(&mut self, txid: Txid, current_height: u64) -> Result<(), SwapError> {
        self.mark_refunded_with_margin(txid, current_height, true)
    }

    /// Record the refund after re-validating with [`Self::can_refund`].
    pub fn mark_refunded_with_margin(
        &mut self,
        txid: Txid,
        current_height: u64,
        require_safety_margin: bool,
    ) -> Result<(), SwapError> {
        self.can_refund(current_height, require_safety_margin)?;
        let funding = match self.state {
            SwapState::Funded { funding } | SwapState::Expired { funding, .. } => funding,
            _ => return Err(self.transition_error(SwapStatus::Refunded, "HTLC not refundable")),
        };
        self.state = SwapState::Refunded {
            funding,
            refund_txid: txid,
            refunded_at: now_secs(),
        };
        info!(
            payment_hash = %self.payment_hash(),
            %txid,
            height = current_height,
            "[swap] HTLC refunded"
        );
        Ok(())
    }

    /// Record that the timeout has passed. Legal only from `Funded`.
    pub fn mark_expired(&mut self, current_height: u64) -> Result<(), SwapError> {
        self.ensure_transition(SwapStatus::Expired)?;
        let SwapState::Funded { funding } = self.state else {
            return Err(self.transition_error(SwapStatus::Expired, "HTLC not funded"));
        };
        if current_height < funding.expiry_height {
            return Err(SwapError::TimeoutNotReached {
                remaining: funding.expiry_height - current_height,
                expiry_height: funding.expiry_height,
            });
        }
        self.state = SwapState::Expired {
            funding,
            expired_at_height: current_height,
        };
        info!(
            payment_hash = %self.payment_hash(),
            height = current_height,
            "[swap] HTLC expired"
        );
        Ok(())
    }

    /// JSON audit record. Never contains the preimage.
    pub fn audit_record(&self) -> serde_json::Value {
        let params = self.params();
        let funding = self.state.funding();
        let (claim_txid, claimed_at) = match &self.state {
            SwapState::Claimed {
                claim_txid,
                claimed_at,
                ..
            } => (Some(claim_txid.to_string()), Some(*claimed_at)),
            _ => (None, None),
        };
        let (refund_txid, refunded_at) = match &self.state {
            SwapState::Refunded {
                refund_txid,
                refunded_at,
                ..
            } => (Some(refund_txid.to_string()), Some(*refunded_at)),
            _ => (None, None),
        };
        let expired_at_height = match &self.state {
            SwapState::Expired {
                expired_at_height, ..
            } => Some(*expired_at_height),
            _ => None,
        };
        json!({
            "id": self.id.to_string(),
            "state": self.status(),
            "parameters": {
                "amount_sats": params.amount(),
                "payment_hash": params.payment_hash().to_hex(),
                "receiver_pubkey": params.receiver_pubkey().to_hex(),
                "sender_pubkey": params.sender_pubkey().to_hex(),
                "timeout_blocks": params.timeout(),
                "network": params.network(),
            },
            "script": {
                "script_hex": self.script.script_hex(),
                "script_hash": hex::encode(self.script.script_hash()),
                "address": self.script.address(),
            },
            "transactions": {
                "funding_txid": funding.map(|f| f.txid.to_string()),
                "funding_vout": funding.map(|f| f.vout),
                "claim_txid": claim_txid,
                "refund_txid": refund_txid,
            },
            "blocks": {
                "funding_block_height": funding.map(|f| f.height),
                "expiry_block_height": funding.map(|f| f.expiry_height),
                "expired_at_height": expired_at_height,
            },
            "timestamps": {
                "created_at": self.created_at,
                "funded_at": funding.map(|f| f.funded_at),
                "claimed_at": claimed_at,
                "refunded_at": refunded_at,
            },
        })
    }
}
