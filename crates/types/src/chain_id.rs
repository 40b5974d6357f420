//! Chain identifier.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifies one configured chain (and therefore one virtual node).
///
/// Used as a map key, as the routing key on the front door and metrics
/// listeners, and as the namespace for the chain's persisted data. The
/// string form is the decimal chain id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub u64);

impl ChainId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error parsing a [`ChainId`] from a string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid chain id: {0:?}")]
pub struct ChainIdParseError(pub String);

impl FromStr for ChainId {
    type Err = ChainIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(ChainId)
            .map_err(|_| ChainIdParseError(s.to_string()))
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

// TOML table keys are always strings, so accept both forms.
impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChainIdVisitor;

        impl Visitor<'_> for ChainIdVisitor {
            type Value = ChainId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a chain id as an unsigned integer or decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ChainId, E> {
                Ok(ChainId(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ChainId, E> {
                u64::try_from(v)
                    .map(ChainId)
                    .map_err(|_| E::custom(format!("negative chain id: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ChainId, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ChainIdVisitor)
    }
}
