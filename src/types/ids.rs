//! Fixed-size identifiers.
//!
//! [`Id`] (32 bytes) names transactions, outputs, assets, chains and derived
//! rows. [`ShortId`] (20 bytes) names addresses. Both render as cb58.

use crate::utils::error::{IndexerError, Result};
use crate::utils::formatting::{decode_cb58, encode_cb58};
use ripemd::Ripemd160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

macro_rules! cb58_identifier {
    ($name:ident, $len:expr) => {
        impl $name {
            /// Byte length of this identifier.
            pub const LEN: usize = $len;

            /// Wraps raw bytes.
            #[must_use]
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Copies an identifier out of a slice of exactly [`Self::LEN`] bytes.
            pub fn from_slice(bytes: &[u8]) -> Result<Self> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| {
                    IndexerError::DecodingError(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok(Self(arr))
            }

            #[must_use]
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&encode_cb58(&self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = IndexerError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_slice(&decode_cb58(s)?)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// 32-byte identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Id([u8; 32]);

cb58_identifier!(Id, 32);

impl Id {
    /// The all-zero id. Also the id of the platform chain.
    pub const EMPTY: Id = Id([0u8; 32]);

    /// SHA-256 of `bytes`.
    #[must_use]
    pub fn hash_of(bytes: &[u8]) -> Self {
        Id(Sha256::digest(bytes).into())
    }

    /// Derives a child id: SHA-256 of `n` (u64, big-endian) followed by this id.
    ///
    /// The output at position `n` of transaction `t` is `t.prefix(n)`; a
    /// redemption of that output reuses the same value.
    #[must_use]
    pub fn prefix(&self, n: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(n.to_be_bytes());
        hasher.update(self.0);
        Id(hasher.finalize().into())
    }
}

/// 20-byte address identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ShortId([u8; 20]);

cb58_identifier!(ShortId, 20);

impl ShortId {
    /// Address of a public key: RIPEMD-160 of the SHA-256 of its compressed encoding.
    #[must_use]
    pub fn from_public_key(compressed: &[u8]) -> Self {
        let sha = Sha256::digest(compressed);
        ShortId(Ripemd160::digest(sha).into())
    }
}
