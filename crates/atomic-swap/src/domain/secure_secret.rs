//! # Preimage Type
//!
//! Wrapper for HTLC preimages that zeroizes memory on drop.
//!
//! ## Security
//!
//! The preimage is the only thing standing between the receiver and the
//! locked funds. It must not linger in memory after the swap finishes,
//! and it must never reach a log line.

use super::errors::{SwapError, PREIMAGE_SIZE};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A 32-byte preimage that zeroizes on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Preimage {
    inner: [u8; PREIMAGE_SIZE],
}

impl Preimage {
    /// Create from bytes.
    pub fn new(bytes: [u8; PREIMAGE_SIZE]) -> Self {
        Self { inner: bytes }
    }

    /// Create from a slice, rejecting any length other than 32.
    pub fn from_slice(slice: &[u8]) -> Result<Self, SwapError> {
        if slice.len() != PREIMAGE_SIZE {
            return Err(SwapError::InvalidLength {
                what: "preimage",
                expected: "32",
                got: slice.len(),
            });
        }
        let mut inner = [0u8; PREIMAGE_SIZE];
        inner.copy_from_slice(slice);
        Ok(Self { inner })
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Result<Self, SwapError> {
        let mut bytes = hex::decode(s)
            .map_err(|e| SwapError::InvalidParameter(format!("preimage hex: {e}")))?;
        let result = Self::from_slice(&bytes);
        bytes.zeroize();
        result
    }

    /// Secret bytes. Use immediately and let go.
    pub fn as_bytes(&self) -> &[u8; PREIMAGE_SIZE] {
        &self.inner
    }

    /// Lowercase hex. The returned string is not zeroized.
    pub fn to_hex(&self) -> String {
        hex::encode(self.inner)
    }
}

impl PartialEq for Preimage {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.inner.ct_eq(&other.inner).into()
    }
}

impl Eq for Preimage {}

impl std::fmt::Debug for Preimage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Preimage(***)")
    }
}

impl Serialize for Preimage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Preimage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preimage_creation() {
        let secret = Preimage::new([0xABu8; 32]);
        assert_eq!(secret.as_bytes()[0], 0xAB);
    }

    #[test]
    fn test_preimage_debug_hides_value() {
        let secret = Preimage::new([0xABu8; 32]);
        let debug_str = format!("{:?}", secret);
        assert!(!debug_str.to_lowercase().contains("ab"));
        assert_eq!(debug_str, "Preimage(***)");
    }

    #[test]
    fn test_preimage_from_slice_wrong_length() {
        assert!(matches!(
            Preimage::from_slice(&[0xCDu8; 16]),
            Err(SwapError::InvalidLength { got: 16, .. })
        ));
    }

    #[test]
    fn test_preimage_hex() {
        let secret = Preimage::new([0x5Au8; 32]);
        let parsed = Preimage::from_hex(&secret.to_hex()).unwrap();
        assert_eq!(parsed, secret);
        assert!(Preimage::from_hex("zz").is_err());
        assert!(Preimage::from_hex("abcd").is_err());
    }

    #[test]
    fn test_zeroize_clears_bytes() {
        let mut secret = Preimage::new([0xFFu8; 32]);
        secret.zeroize();
        assert_eq!(secret.as_bytes(), &[0u8; 32]);
    }
}
