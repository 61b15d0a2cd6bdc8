//! CAIP-2 identifiers for EVM chains.
//!
//! Every chain this crate submits to is EVM-compatible, so a [`ChainId`] is the
//! numeric EIP-155 chain id wrapped with its CAIP-2 string form:
//!
//! ```
//! use gasless_tx::chain::ChainId;
//!
//! let zksync: ChainId = "eip155:324".parse().unwrap();
//! assert_eq!(zksync.inner(), 324);
//! assert_eq!(zksync.to_string(), "eip155:324");
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

use crate::chain::networks;

/// The CAIP-2 namespace for EVM-compatible chains.
pub const EIP155_NAMESPACE: &str = "eip155";

/// A numeric EIP-155 chain id, serialized as a CAIP-2 string (`"eip155:56"`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(u64);

impl ChainId {
    pub const fn new(chain_id: u64) -> Self {
        Self(chain_id)
    }

    /// Returns the numeric chain id.
    pub const fn inner(&self) -> u64 {
        self.0
    }

    /// Returns the namespace component. Always `eip155`.
    pub fn namespace(&self) -> &'static str {
        EIP155_NAMESPACE
    }

    /// Looks up a chain id by its well-known network name.
    ///
    /// ```
    /// use gasless_tx::chain::ChainId;
    ///
    /// let bsc = ChainId::from_network_name("bsc-testnet").unwrap();
    /// assert_eq!(bsc.inner(), 97);
    /// assert!(ChainId::from_network_name("unknown").is_none());
    /// ```
    pub fn from_network_name(network_name: &str) -> Option<Self> {
        networks::chain_id_by_network_name(network_name)
    }

    /// Returns the well-known network name for this chain id, if any.
    pub fn as_network_name(&self) -> Option<&'static str> {
        networks::network_name_by_chain_id(*self)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", EIP155_NAMESPACE, self.0)
    }
}

impl From<u64> for ChainId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ChainId> for u64 {
    fn from(value: ChainId) -> Self {
        value.0
    }
}

/// Error returned when parsing an invalid chain id string.
#[derive(Debug, thiserror::Error)]
pub enum ChainIdFormatError {
    #[error("Invalid chain id format {0}")]
    InvalidFormat(String),
    #[error("Unsupported namespace {0}, expected eip155")]
    InvalidNamespace(String),
    #[error("Invalid eip155 chain reference {0}")]
    InvalidReference(String),
}

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s
            .split_once(':')
            .ok_or_else(|| ChainIdFormatError::InvalidFormat(s.into()))?;
        if namespace != EIP155_NAMESPACE {
            return Err(ChainIdFormatError::InvalidNamespace(namespace.into()));
        }
        let chain_id = reference
            .parse::<u64>()
            .map_err(|_| ChainIdFormatError::InvalidReference(reference.into()))?;
        Ok(ChainId(chain_id))
    }
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(de::Error::custom)
    }
}
