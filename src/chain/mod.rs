//! Chain identifiers, per-attempt chain context, and the registry of configured chains.
//!
//! - [`ChainId`] - CAIP-2 identifier of an EVM chain (e.g. `eip155:324` for zkSync Era)
//! - [`ChainContext`] - chain and account a single submission attempt runs against
//! - [`ChainRegistry`] - configured [`eip155::Eip155ChainProvider`]s keyed by chain id

mod chain_id;
pub mod eip155;
pub mod networks;

pub use chain_id::*;

use alloy_primitives::Address;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ChainsConfig;

/// Chain and account one submission attempt runs against. Immutable for the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainContext {
    pub chain_id: ChainId,
    pub account: Address,
}

impl ChainContext {
    pub fn new(chain_id: ChainId, account: Address) -> Self {
        Self { chain_id, account }
    }
}

/// Asynchronously constructs an instance of `Self` from a configuration type.
#[async_trait::async_trait]
pub trait FromConfig<TConfig>
where
    Self: Sized,
{
    async fn from_config(config: &TConfig) -> Result<Self, Box<dyn std::error::Error>>;
}

/// Registry of configured chain providers indexed by chain id.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry(HashMap<ChainId, Arc<eip155::Eip155ChainProvider>>);

impl ChainRegistry {
    pub fn new(providers: HashMap<ChainId, Arc<eip155::Eip155ChainProvider>>) -> Self {
        Self(providers)
    }

    /// Looks up a provider by chain id.
    pub fn by_chain_id(&self, chain_id: ChainId) -> Option<&Arc<eip155::Eip155ChainProvider>> {
        self.0.get(&chain_id)
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.0.keys().copied()
    }
}

#[async_trait::async_trait]
impl FromConfig<ChainsConfig> for ChainRegistry {
    async fn from_config(chains: &ChainsConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let mut providers = HashMap::with_capacity(chains.len());
        for chain in chains.iter() {
            let provider = eip155::Eip155ChainProvider::from_config(chain).await?;
            providers.insert(chain.chain_id(), Arc::new(provider));
        }
        Ok(Self(providers))
    }
}
