use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Number of bytes in a site identifier.
pub const SITE_ID_LEN: usize = 16;

/// Stable identifier of one store replica.
///
/// The merge engine assigns a `SiteId` to every store instance when it is
/// first created and stamps it on every change entry that instance
/// originates. On the wire it travels as 32 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteId([u8; SITE_ID_LEN]);

impl SiteId {
    /// Generate a fresh random site identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SITE_ID_LEN];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; SITE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a byte slice, as read from a BLOB column.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != SITE_ID_LEN {
            return Err(TypeError::InvalidLength {
                expected: SITE_ID_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SITE_ID_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SITE_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for log lines and tables.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s.trim()).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Parse the wire form, where an empty string means "unknown".
    pub fn parse_optional(s: &str) -> Result<Option<Self>, TypeError> {
        if s.trim().is_empty() {
            Ok(None)
        } else {
            Self::from_hex(s).map(Some)
        }
    }
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteId({})", self.short_hex())
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for SiteId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for SiteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SiteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
