//! Registry of well-known EVM networks.
//!
//! Lets configuration and the CLI refer to chains by name (`"zksync-sepolia"`)
//! instead of numeric ids. Lookups work both ways through lazily built maps.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::chain::ChainId;

/// A known network: human-readable name and numeric EIP-155 chain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: &'static str,
    pub chain_id: u64,
}

impl NetworkInfo {
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.chain_id)
    }
}

pub static KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo { name: "ethereum", chain_id: 1 },
    NetworkInfo { name: "sepolia", chain_id: 11155111 },
    NetworkInfo { name: "bsc", chain_id: 56 },
    NetworkInfo { name: "bsc-testnet", chain_id: 97 },
    NetworkInfo { name: "opbnb", chain_id: 204 },
    NetworkInfo { name: "opbnb-testnet", chain_id: 5611 },
    NetworkInfo { name: "arbitrum", chain_id: 42161 },
    NetworkInfo { name: "arbitrum-sepolia", chain_id: 421614 },
    NetworkInfo { name: "zksync", chain_id: 324 },
    NetworkInfo { name: "zksync-sepolia", chain_id: 300 },
    NetworkInfo { name: "optimism", chain_id: 10 },
    NetworkInfo { name: "optimism-sepolia", chain_id: 11155420 },
    NetworkInfo { name: "base", chain_id: 8453 },
    NetworkInfo { name: "base-sepolia", chain_id: 84532 },
    NetworkInfo { name: "unichain", chain_id: 130 },
    NetworkInfo { name: "unichain-sepolia", chain_id: 1301 },
];

static NAME_TO_CHAIN_ID: LazyLock<HashMap<&'static str, ChainId>> = LazyLock::new(|| {
    KNOWN_NETWORKS
        .iter()
        .map(|n| (n.name, n.chain_id()))
        .collect()
});

static CHAIN_ID_TO_NAME: LazyLock<HashMap<ChainId, &'static str>> = LazyLock::new(|| {
    KNOWN_NETWORKS
        .iter()
        .map(|n| (n.chain_id(), n.name))
        .collect()
});

/// Returns the chain id of a well-known network name.
pub fn chain_id_by_network_name(name: &str) -> Option<ChainId> {
    NAME_TO_CHAIN_ID.get(name).copied()
}

/// Reverse of [`chain_id_by_network_name`].
pub fn network_name_by_chain_id(chain_id: ChainId) -> Option<&'static str> {
    CHAIN_ID_TO_NAME.get(&chain_id).copied()
}
