use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

use crate::error::HashFormatError;

/// 256-bit hash used to identify blocks, artifacts and every other
/// content-addressed value in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// The all-zero hash, used as the genesis block's `previous_hash`.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Builds a hash from a raw 32-byte array.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the hash.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes the SHA3-256 digest of `data`.
    #[must_use]
    pub fn sha3_256(data: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// Parses a hash from a lower- or upper-case hex string. The canonical
    /// form is always lower-case; this accepts either on input.
    ///
    /// # Errors
    ///
    /// Returns an error if `hex_str` is not exactly 64 hex characters.
    pub fn from_hex(hex_str: &str) -> Result<Self, HashFormatError> {
        let bytes =
            hex::decode(hex_str).map_err(|e| HashFormatError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(HashFormatError::WrongLength(bytes.len()));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }

    /// Number of leading all-zero hex nibbles in the hash.
    #[must_use]
    pub fn leading_hex_zeros(&self) -> u32 {
        let mut zeros = 0;
        for &byte in &self.0 {
            if byte == 0 {
                zeros += 2;
            } else if byte < 0x10 {
                zeros += 1;
                break;
            } else {
                break;
            }
        }
        zeros
    }

    /// Whether this hash begins with at least `difficulty` hex zero
    /// characters, i.e. satisfies proof-of-work at that difficulty.
    #[must_use]
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_hex_zeros() >= difficulty
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for Hash256 {
    type Err = HashFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
