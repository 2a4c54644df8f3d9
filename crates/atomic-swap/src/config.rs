//! # Swap Engine Configuration
//!
//! Runtime settings for `SwapService`, the settlement bridge and the
//! streaming monitor.

use crate::domain::{HashForm, Network};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Swap engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapConfig {
    /// Ledger the HTLCs live on.
    pub network: Network,

    /// Payment-hash form accepted by the service. The other form is rejected.
    pub hash_form: HashForm,

    /// Wait for the reorg safety margin before refunding.
    pub require_refund_margin: bool,

    /// Funding fee rate in sat/vB.
    pub fee_rate: u64,

    /// Flat fee for claim and refund transactions, in sats.
    pub claim_fee: u64,

    /// Invoice expiry in seconds.
    pub invoice_expiry_secs: u64,

    /// Interval between invoice lookups while awaiting settlement.
    pub settlement_poll_ms: u64,

    /// Upper bound on one settlement wait.
    pub settlement_timeout_secs: u64,

    /// First reconnect delay of the settlement monitor.
    pub reconnect_initial_ms: u64,

    /// Reconnect delay cap.
    pub reconnect_max_ms: u64,

    /// Monitor command channel capacity.
    pub command_buffer: usize,

    /// Cap on one invoice lookup made by the settlement monitor.
    pub lookup_timeout_ms: u64,

    /// Confirmations a wallet UTXO needs before it funds a swap.
    pub min_confirmations: u32,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            network: Network::BitcoinTestnet,
            hash_form: HashForm::Sha256,
            require_refund_margin: true,
            fee_rate: 10,
            claim_fee: 1_000,
            invoice_expiry_secs: 3_600,
            settlement_poll_ms: 1_000,
            settlement_timeout_secs: 3_600,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            command_buffer: 64,
            lookup_timeout_ms: 5_000,
            min_confirmations: 1,
        }
    }
}

impl SwapConfig {
    /// Create a config for testing (short waits).
    pub fn for_testing() -> Self {
        Self {
            fee_rate: 2,
            claim_fee: 500,
            invoice_expiry_secs: 600,
            settlement_poll_ms: 10,
            settlement_timeout_secs: 2,
            reconnect_initial_ms: 5,
            reconnect_max_ms: 50,
            command_buffer: 16,
            lookup_timeout_ms: 200,
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SWAP_NETWORK`: `bitcoin-mainnet`, `bitcoin-testnet`, `liquid-mainnet`
    ///   or `liquid-testnet` (default: bitcoin-testnet)
    /// - `SWAP_FEE_RATE`: funding fee rate in sat/vB (default: 10)
    /// - `SWAP_CLAIM_FEE`: claim/refund fee in sats (default: 1000)
    /// - `SWAP_INVOICE_EXPIRY_SECS`: invoice expiry (default: 3600)
    /// - `SWAP_SETTLEMENT_TIMEOUT_SECS`: settlement wait cap (default: 3600)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            network: parse_var("SWAP_NETWORK").unwrap_or(defaults.network),
            fee_rate: parse_var("SWAP_FEE_RATE").unwrap_or(defaults.fee_rate),
            claim_fee: parse_var("SWAP_CLAIM_FEE").unwrap_or(defaults.claim_fee),
            invoice_expiry_secs: parse_var("SWAP_INVOICE_EXPIRY_SECS")
                .unwrap_or(defaults.invoice_expiry_secs),
            settlement_timeout_secs: parse_var("SWAP_SETTLEMENT_TIMEOUT_SECS")
                .unwrap_or(defaults.settlement_timeout_secs),
            ..defaults
        }
    }

    /// Settlement poll interval.
    pub fn settlement_poll_interval(&self) -> Duration {
        Duration::from_millis(self.settlement_poll_ms)
    }

    /// Settlement wait cap.
    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_secs)
    }

    /// Monitor lookup cap, at least one millisecond.
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms.max(1))
    }

    /// Reconnect backoff bounds as `(initial, max)`.
    pub fn reconnect_backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.reconnect_initial_ms),
            Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms)),
        )
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
