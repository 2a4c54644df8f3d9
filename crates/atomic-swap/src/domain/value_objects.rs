//! # Domain Value Objects
//!
//! Immutable value types: networks and their timing constants, payment
//! hashes, compressed public keys and the lifecycle status tag.

use super::errors::{Hash, Hash160, SwapError};
use bitcoin::hashes::{ripemd160, Hash as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Smallest output value (sats) the engine will create.
pub const DUST_LIMIT: u64 = 546;

/// Largest relative timelock expressible in a BIP68 sequence (blocks).
pub const MAX_RELATIVE_TIMEOUT: u32 = 65_535;

/// Supported ledgers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    /// Bitcoin mainnet.
    BitcoinMainnet,
    /// Bitcoin testnet.
    BitcoinTestnet,
    /// Liquid mainnet.
    LiquidMainnet,
    /// Liquid testnet.
    LiquidTestnet,
}

impl Network {
    /// All supported networks.
    pub const ALL: [Network; 4] = [
        Network::BitcoinMainnet,
        Network::BitcoinTestnet,
        Network::LiquidMainnet,
        Network::LiquidTestnet,
    ];

    /// Timing constants for this network.
    pub const fn timing_profile(&self) -> NetworkTimingProfile {
        match self {
            Network::BitcoinMainnet => NetworkTimingProfile {
                block_interval_secs: 600,
                safety_margin: 6,
                min_timeout: 144,
                max_timeout: 2016,
            },
            Network::BitcoinTestnet => NetworkTimingProfile {
                block_interval_secs: 600,
                safety_margin: 6,
                min_timeout: 12,
                max_timeout: 288,
            },
            Network::LiquidMainnet => NetworkTimingProfile {
                block_interval_secs: 60,
                safety_margin: 2,
                min_timeout: 288,
                max_timeout: 4320,
            },
            Network::LiquidTestnet => NetworkTimingProfile {
                block_interval_secs: 60,
                safety_margin: 2,
                min_timeout: 24,
                max_timeout: 288,
            },
        }
    }

    /// Human-readable part for segwit addresses.
    ///
    /// Liquid uses its unconfidential segwit prefixes.
    pub const fn bech32_hrp(&self) -> &'static str {
        match self {
            Network::BitcoinMainnet => "bc",
            Network::BitcoinTestnet => "tb",
            Network::LiquidMainnet => "ex",
            Network::LiquidTestnet => "tex",
        }
    }

    /// Check if this is a test network.
    pub const fn is_testnet(&self) -> bool {
        matches!(self, Network::BitcoinTestnet | Network::LiquidTestnet)
    }

    /// Check if this is the Liquid sidechain.
    pub const fn is_sidechain(&self) -> bool {
        matches!(self, Network::LiquidMainnet | Network::LiquidTestnet)
    }

    /// Canonical name, as accepted by [`FromStr`].
    pub const fn as_str(&self) -> &'static str {
        match self {
            Network::BitcoinMainnet => "bitcoin-mainnet",
            Network::BitcoinTestnet => "bitcoin-testnet",
            Network::LiquidMainnet => "liquid-mainnet",
            Network::LiquidTestnet => "liquid-testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bitcoin-mainnet" | "bitcoin" | "mainnet" => Ok(Network::BitcoinMainnet),
            "bitcoin-testnet" | "testnet" => Ok(Network::BitcoinTestnet),
            "liquid-mainnet" | "liquid" | "liquidv1" => Ok(Network::LiquidMainnet),
            "liquid-testnet" | "liquidtestnet" => Ok(Network::LiquidTestnet),
            other => Err(SwapError::InvalidParameter(format!(
                "unknown network: {other}"
            ))),
        }
    }
}

/// Per-network timing constants. Read-only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTimingProfile {
    /// Nominal block interval in seconds.
    pub block_interval_secs: u64,
    /// Reorg-safety margin in blocks.
    pub safety_margin: u32,
    /// Minimum allowed HTLC timeout in blocks.
    pub min_timeout: u32,
    /// Maximum allowed HTLC timeout in blocks.
    pub max_timeout: u32,
}

impl NetworkTimingProfile {
    /// Estimated wall-clock seconds for `blocks` blocks.
    pub const fn estimate_secs(&self, blocks: u64) -> u64 {
        blocks.saturating_mul(self.block_interval_secs)
    }

    /// Check if `timeout` lies in `[min_timeout, max_timeout]`.
    pub fn check_timeout(&self, timeout: u32) -> Result<(), SwapError> {
        if timeout < self.min_timeout {
            return Err(SwapError::TimeoutTooShort {
                timeout,
                min: self.min_timeout,
            });
        }
        if timeout > self.max_timeout {
            return Err(SwapError::TimeoutTooLong {
                timeout,
                max: self.max_timeout,
            });
        }
        Ok(())
    }
}

/// Which payment-hash form a deployment treats as canonical.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashForm {
    /// 32-byte SHA-256 (the form Lightning invoices carry).
    #[default]
    Sha256,
    /// 20-byte RIPEMD160(SHA-256).
    Hash160,
}

impl FromStr for HashForm {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashForm::Sha256),
            "hash160" => Ok(HashForm::Hash160),
            other => Err(SwapError::InvalidParameter(format!(
                "unknown hash form: {other}"
            ))),
        }
    }
}

/// Payment hash in either accepted form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PaymentHash {
    /// SHA-256(preimage).
    Sha256(Hash),
    /// RIPEMD160(SHA-256(preimage)).
    Hash160(Hash160),
}

impl PaymentHash {
    /// Parse a 20- or 32-byte hash.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SwapError> {
        match bytes.len() {
            32 => {
                let mut h = [0u8; 32];
                h.copy_from_slice(bytes);
                Ok(PaymentHash::Sha256(h))
            }
            20 => {
                let mut h = [0u8; 20];
                h.copy_from_slice(bytes);
                Ok(PaymentHash::Hash160(h))
            }
            got => Err(SwapError::InvalidLength {
                what: "payment hash",
                expected: "20 or 32",
                got,
            }),
        }
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Result<Self, SwapError> {
        let bytes = hex::decode(s)
            .map_err(|e| SwapError::InvalidParameter(format!("payment hash hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// The form this hash is in.
    pub fn form(&self) -> HashForm {
        match self {
            PaymentHash::Sha256(_) => HashForm::Sha256,
            PaymentHash::Hash160(_) => HashForm::Hash160,
        }
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PaymentHash::Sha256(h) => h,
            PaymentHash::Hash160(h) => h,
        }
    }

    /// The 20-byte form embedded in the claim branch.
    ///
    /// `HASH160(preimage) = RIPEMD160(SHA-256(preimage))`, so a SHA-256
    /// hash only needs the outer RIPEMD160.
    pub fn to_hash160(&self) -> Hash160 {
        match self {
            PaymentHash::Sha256(h) => ripemd160::Hash::hash(h).to_byte_array(),
            PaymentHash::Hash160(h) => *h,
        }
    }

    /// Lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Hash> for PaymentHash {
    fn from(h: Hash) -> Self {
        PaymentHash::Sha256(h)
    }
}

impl Serialize for PaymentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PaymentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// 33-byte compressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompressedPubkey([u8; 33]);

impl CompressedPubkey {
    /// Validate size and parity marker.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SwapError> {
        if bytes.len() != 33 {
            return Err(SwapError::InvalidLength {
                what: "public key",
                expected: "33",
                got: bytes.len(),
            });
        }
        if bytes[0] != 0x02 && bytes[0] != 0x03 {
            return Err(SwapError::InvalidParameter(format!(
                "public key must start with 0x02 or 0x03, got 0x{:02x}",
                bytes[0]
            )));
        }
        let mut key = [0u8; 33];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Result<Self, SwapError> {
        let bytes = hex::decode(s)
            .map_err(|e| SwapError::InvalidParameter(format!("public key hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// Lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for CompressedPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompressedPubkey({})", self.to_hex())
    }
}

impl Serialize for CompressedPubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CompressedPubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle status tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStatus {
    /// HTLC built, not yet funded.
    #[default]
    Created,
    /// Funding transaction confirmed.
    Funded,
    /// Receiver claimed with the preimage.
    Claimed,
    /// Timeout reached, funds not yet reclaimed.
    Expired,
    /// Sender reclaimed after timeout.
    Refunded,
}

impl SwapStatus {
    /// Check if transition is in the lifecycle graph.
    pub fn can_transition_to(&self, next: SwapStatus) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Funded)
                | (Self::Funded, Self::Claimed)
                | (Self::Funded, Self::Expired)
                | (Self::Funded, Self::Refunded)
                | (Self::Expired, Self::Refunded)
        )
    }

    /// Check if terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Claimed | Self::Refunded)
    }

    /// Lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Funded => "funded",
            Self::Claimed => "claimed",
            Self::Expired => "expired",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_profiles() {
        let btc = Network::BitcoinMainnet.timing_profile();
        assert_eq!(btc.block_interval_secs, 600);
        assert_eq!(btc.safety_margin, 6);
        assert_eq!((btc.min_timeout, btc.max_timeout), (144, 2016));

        let tbtc = Network::BitcoinTestnet.timing_profile();
        assert_eq!((tbtc.min_timeout, tbtc.max_timeout), (12, 288));

        let lq = Network::LiquidMainnet.timing_profile();
        assert_eq!(lq.block_interval_secs, 60);
        assert_eq!(lq.safety_margin, 2);
        assert_eq!((lq.min_timeout, lq.max_timeout), (288, 4320));

        let tlq = Network::LiquidTestnet.timing_profile();
        assert_eq!((tlq.min_timeout, tlq.max_timeout), (24, 288));
    }

    #[test]
    fn test_check_timeout_bounds() {
        let p = Network::BitcoinTestnet.timing_profile();
        assert!(p.check_timeout(12).is_ok());
        assert!(p.check_timeout(288).is_ok());
        assert!(matches!(
            p.check_timeout(11),
            Err(SwapError::TimeoutTooShort { timeout: 11, min: 12 })
        ));
        assert!(matches!(
            p.check_timeout(289),
            Err(SwapError::TimeoutTooLong { .. })
        ));
    }

    #[test]
    fn test_network_from_str() {
        for n in Network::ALL {
            assert_eq!(n.as_str().parse::<Network>().unwrap(), n);
        }
        assert_eq!("TESTNET".parse::<Network>().unwrap(), Network::BitcoinTestnet);
        assert!("dogecoin".parse::<Network>().is_err());
    }

    #[test]
    fn test_hrp() {
        assert_eq!(Network::BitcoinMainnet.bech32_hrp(), "bc");
        assert_eq!(Network::LiquidTestnet.bech32_hrp(), "tex");
        assert!(Network::LiquidTestnet.is_testnet());
        assert!(Network::LiquidTestnet.is_sidechain());
        assert!(!Network::BitcoinMainnet.is_sidechain());
    }

    #[test]
    fn test_payment_hash_lengths() {
        assert_eq!(
            PaymentHash::from_slice(&[1u8; 32]).unwrap().form(),
            HashForm::Sha256
        );
        assert_eq!(
            PaymentHash::from_slice(&[1u8; 20]).unwrap().form(),
            HashForm::Hash160
        );
        assert!(matches!(
            PaymentHash::from_slice(&[1u8; 31]),
            Err(SwapError::InvalidLength { got: 31, .. })
        ));
    }

    #[test]
    fn test_hash160_passthrough() {
        let h = PaymentHash::Hash160([7u8; 20]);
        assert_eq!(h.to_hash160(), [7u8; 20]);
    }

    #[test]
    fn test_sha256_reduces_to_ripemd160() {
        // RIPEMD160 of 32 zero bytes
        let h = PaymentHash::Sha256([0u8; 32]);
        assert_eq!(
            hex::encode(h.to_hash160()),
            "d1a70126ff7a149ca6f9b638db084480440ff842"
        );
    }

    #[test]
    fn test_pubkey_validation() {
        let mut key = [0x11u8; 33];
        key[0] = 0x02;
        assert!(CompressedPubkey::from_slice(&key).is_ok());
        key[0] = 0x03;
        assert!(CompressedPubkey::from_slice(&key).is_ok());
        key[0] = 0x04;
        assert!(matches!(
            CompressedPubkey::from_slice(&key),
            Err(SwapError::InvalidParameter(_))
        ));
        assert!(matches!(
            CompressedPubkey::from_slice(&key[..32]),
            Err(SwapError::InvalidLength { got: 32, .. })
        ));
    }

    #[test]
    fn test_status_transitions() {
        use SwapStatus::*;
        assert!(Created.can_transition_to(Funded));
        assert!(Funded.can_transition_to(Claimed));
        assert!(Funded.can_transition_to(Expired));
        assert!(Funded.can_transition_to(Refunded));
        assert!(Expired.can_transition_to(Refunded));

        assert!(!Created.can_transition_to(Claimed));
        assert!(!Expired.can_transition_to(Claimed));
        assert!(!Expired.can_transition_to(Expired));
        assert!(!Claimed.can_transition_to(Refunded));
        assert!(!Refunded.can_transition_to(Funded));
    }

    #[test]
    fn test_status_terminal() {
        assert!(SwapStatus::Claimed.is_terminal());
        assert!(SwapStatus::Refunded.is_terminal());
        assert!(!SwapStatus::Expired.is_terminal());
    }
}
