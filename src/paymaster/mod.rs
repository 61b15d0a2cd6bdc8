//! Paymaster capability probe and sponsored relay.
//!
//! A paymaster is the service that pays transaction fees on behalf of users.
//! The orchestrator asks it one question before each attempt, "do you currently
//! sponsor this chain?", through [`CapabilityProbe`]. Answers are cached per chain
//! until [`CapabilityProbe::refetch`] is called, which happens after a sponsored
//! submission is refused.
//!
//! [`PaymasterClient`] is the HTTP implementation; it also relays sponsored
//! transactions (see [`PaymasterClient::sponsor`]).

mod client;

pub use client::*;

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::chain::ChainId;

/// Answers whether the paymaster is currently willing to sponsor a chain.
pub trait CapabilityProbe {
    type Error: Debug + Display + Send;

    /// Returns the cached answer, querying the paymaster on a cache miss.
    fn can_sponsor(
        &self,
        chain_id: ChainId,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Queries the paymaster unconditionally and replaces the cached answer.
    fn refetch(&self, chain_id: ChainId)
    -> impl Future<Output = Result<bool, Self::Error>> + Send;
}

impl<T: CapabilityProbe + Sync + Send> CapabilityProbe for Arc<T> {
    type Error = T::Error;

    fn can_sponsor(
        &self,
        chain_id: ChainId,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        (**self).can_sponsor(chain_id)
    }

    fn refetch(
        &self,
        chain_id: ChainId,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        (**self).refetch(chain_id)
    }
}

/// No paymaster configured: nothing is ever sponsored.
impl<T: CapabilityProbe + Sync> CapabilityProbe for Option<T> {
    type Error = T::Error;

    async fn can_sponsor(&self, chain_id: ChainId) -> Result<bool, Self::Error> {
        match self {
            Some(probe) => probe.can_sponsor(chain_id).await,
            None => Ok(false),
        }
    }

    async fn refetch(&self, chain_id: ChainId) -> Result<bool, Self::Error> {
        match self {
            Some(probe) => probe.refetch(chain_id).await,
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_paymaster_never_sponsors() {
        let probe: Option<PaymasterClient> = None;
        assert!(!probe.can_sponsor(ChainId::new(324)).await.unwrap());
        assert!(!probe.refetch(ChainId::new(324)).await.unwrap());
    }
}
