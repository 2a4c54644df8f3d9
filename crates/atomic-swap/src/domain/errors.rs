//! # Domain Errors
//!
//! Error types for the atomic swap engine.
//!
//! Every variant names the precondition that failed so callers can report
//! it verbatim. [`SwapError::kind`] groups variants into the five error
//! classes the engine distinguishes.

use super::value_objects::SwapStatus;
use std::fmt;
use thiserror::Error;

/// SHA-256 digest (32 bytes).
pub type Hash = [u8; 32];

/// RIPEMD160(SHA-256(x)) digest (20 bytes).
pub type Hash160 = [u8; 20];

/// Size of a preimage in bytes.
pub const PREIMAGE_SIZE: usize = 32;

/// Broad error classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range input. Never retried.
    Validation,
    /// Illegal lifecycle transition.
    State,
    /// Timeout not reached, margin unmet, already expired.
    Timing,
    /// Insufficient inputs or dust output.
    Funds,
    /// Signer, ledger node or Lightning node failure.
    External,
    /// Local environment failure such as an unusable entropy source. Never retried.
    Fatal,
}

/// Which collaborator produced an external failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExternalOrigin {
    /// Transaction signer.
    Signer,
    /// Ledger node (height, UTXOs, broadcast).
    Ledger,
    /// Lightning node (invoices, settlement stream).
    Lightning,
}

impl fmt::Display for ExternalOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signer => f.write_str("signer"),
            Self::Ledger => f.write_str("ledger node"),
            Self::Lightning => f.write_str("lightning node"),
        }
    }
}

/// Swap engine error types.
#[derive(Debug, Error)]
pub enum SwapError {
    /// Byte string of the wrong size.
    #[error("{what} must be {expected} bytes, got {got}")]
    InvalidLength {
        /// Field name.
        what: &'static str,
        /// Accepted size(s).
        expected: &'static str,
        /// Actual size.
        got: usize,
    },

    /// Out-of-range or otherwise unacceptable parameter.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Raw script does not match the HTLC template.
    #[error("malformed HTLC script: {0}")]
    MalformedScript(String),

    /// Address could not be decoded for the network.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Preimage does not hash to the payment hash.
    #[error("preimage does not match payment hash")]
    PreimageMismatch,

    /// Illegal lifecycle transition.
    #[error("invalid state transition {from} -> {to}: {reason}")]
    InvalidStateTransition {
        /// Current state.
        from: SwapStatus,
        /// Attempted state.
        to: SwapStatus,
        /// Which precondition failed.
        reason: &'static str,
    },

    /// No swap registered under the payment hash.
    #[error("swap not found: {0}")]
    SwapNotFound(String),

    /// A swap is already registered under the payment hash.
    #[error("swap already exists: {0}")]
    DuplicateSwap(String),

    /// Timeout below the network minimum.
    #[error("timeout too short: {timeout} blocks < minimum {min} blocks")]
    TimeoutTooShort {
        /// Configured timeout.
        timeout: u32,
        /// Network minimum.
        min: u32,
    },

    /// Timeout above the network maximum.
    #[error("timeout too long: {timeout} blocks > maximum {max} blocks")]
    TimeoutTooLong {
        /// Configured timeout.
        timeout: u32,
        /// Network maximum.
        max: u32,
    },

    /// HTLC is at or past its expiry height.
    #[error("HTLC already expired at block {expiry_height}")]
    AlreadyExpired {
        /// Expiry height.
        expiry_height: u64,
    },

    /// Fewer blocks remain than the reorg-safety margin.
    #[error("HTLC expires too soon: {remaining} blocks remaining (minimum safety margin: {margin} blocks)")]
    ExpiresTooSoon {
        /// Blocks until expiry.
        remaining: u64,
        /// Network safety margin.
        margin: u32,
    },

    /// Refund requested before the timeout.
    #[error("timeout not yet reached: {remaining} blocks remaining until block {expiry_height}")]
    TimeoutNotReached {
        /// Blocks until expiry.
        remaining: u64,
        /// Expiry height.
        expiry_height: u64,
    },

    /// Refund requested inside the reorg-safety margin.
    #[error("safety margin not yet reached: {remaining} blocks remaining until safe refund at block {safe_height}")]
    SafetyMarginNotReached {
        /// Blocks until the safe height.
        remaining: u64,
        /// Expiry height plus margin.
        safe_height: u64,
    },

    /// Inputs do not cover amount plus fee.
    #[error("insufficient funds: need {needed} sats, have {available} sats")]
    InsufficientFunds {
        /// Amount plus fee.
        needed: u64,
        /// Total available.
        available: u64,
    },

    /// Output would be at or below the dust limit.
    #[error("output amount {value} sats below dust limit ({dust_limit} sats)")]
    DustOutput {
        /// Output value after fee (may be negative when fee exceeds input).
        value: i64,
        /// Dust threshold.
        dust_limit: u64,
    },

    /// Lightning invoice was canceled before settlement.
    #[error("invoice canceled: {0}")]
    InvoiceCanceled(String),

    /// Settlement wait elapsed. Inconclusive: the invoice may still settle.
    #[error("timeout waiting for invoice settlement ({secs}s)")]
    SettlementTimeout {
        /// Elapsed wait in seconds.
        secs: u64,
    },

    /// Settlement monitor task is no longer running.
    #[error("settlement monitor stopped")]
    MonitorStopped,

    /// Entropy source failure.
    #[error("entropy source failure: {0}")]
    Entropy(String),

    /// Collaborator failure.
    #[error("{origin} error: {message}")]
    External {
        /// Which collaborator failed.
        origin: ExternalOrigin,
        /// Collaborator message.
        message: String,
    },
}

impl SwapError {
    /// Build an external error tagged with its origin.
    pub fn external(origin: ExternalOrigin, message: impl Into<String>) -> Self {
        Self::External {
            origin,
            message: message.into(),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidLength { .. }
            | Self::InvalidParameter(_)
            | Self::MalformedScript(_)
            | Self::InvalidAddress(_)
            | Self::PreimageMismatch
            | Self::DuplicateSwap(_)
            | Self::TimeoutTooShort { .. }
            | Self::TimeoutTooLong { .. } => ErrorKind::Validation,
            Self::InvalidStateTransition { .. } | Self::SwapNotFound(_) => ErrorKind::State,
            Self::AlreadyExpired { .. }
            | Self::ExpiresTooSoon { .. }
            | Self::TimeoutNotReached { .. }
            | Self::SafetyMarginNotReached { .. }
            | Self::SettlementTimeout { .. } => ErrorKind::Timing,
            Self::InsufficientFunds { .. } | Self::DustOutput { .. } => ErrorKind::Funds,
            Self::InvoiceCanceled(_) | Self::MonitorStopped | Self::External { .. } => {
                ErrorKind::External
            }
            Self::Entropy(_) => ErrorKind::Fatal,
        }
    }

    /// Origin of an external failure, if any.
    pub fn origin(&self) -> Option<ExternalOrigin> {
        match self {
            Self::External { origin, .. } => Some(*origin),
            Self::InvoiceCanceled(_) | Self::MonitorStopped => Some(ExternalOrigin::Lightning),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_length_error() {
        let err = SwapError::InvalidLength {
            what: "preimage",
            expected: "32",
            got: 16,
        };
        assert_eq!(err.to_string(), "preimage must be 32 bytes, got 16");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_state_transition_error_names_reason() {
        let err = SwapError::InvalidStateTransition {
            from: SwapStatus::Claimed,
            to: SwapStatus::Refunded,
            reason: "already claimed",
        };
        assert!(err.to_string().contains("already claimed"));
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn test_timing_errors() {
        let err = SwapError::AlreadyExpired {
            expiry_height: 700_144,
        };
        assert_eq!(err.kind(), ErrorKind::Timing);

        let err = SwapError::TimeoutNotReached {
            remaining: 1,
            expiry_height: 700_144,
        };
        assert!(err.to_string().contains("not yet reached"));
    }

    #[test]
    fn test_timeout_range_is_validation() {
        let err = SwapError::TimeoutTooShort { timeout: 6, min: 12 };
        assert!(err.to_string().contains("timeout too short"));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = SwapError::TimeoutTooLong {
            timeout: 5_000,
            max: 2_016,
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_entropy_failure_is_fatal() {
        let err = SwapError::Entropy("device unavailable".into());
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(err.origin(), None);
    }

    #[test]
    fn test_funds_errors() {
        let err = SwapError::InsufficientFunds {
            needed: 1000,
            available: 10,
        };
        assert!(err.to_string().contains("1000"));
        assert_eq!(err.kind(), ErrorKind::Funds);
    }

    #[test]
    fn test_external_error_origin() {
        let err = SwapError::external(ExternalOrigin::Lightning, "connection refused");
        assert_eq!(err.kind(), ErrorKind::External);
        assert_eq!(err.origin(), Some(ExternalOrigin::Lightning));
        assert!(err.to_string().starts_with("lightning node error"));
    }
}
