use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_provider::fillers::NonceManager;
use alloy_transport::TransportResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sentinel marking an account whose nonce must be fetched from the node.
const UNKNOWN_NONCE: u64 = u64::MAX;

/// Nonce manager that seeds from the `pending` block tag and counts locally afterwards.
///
/// Seeding from `pending` accounts for transactions already in the mempool, so a
/// restart while a standard submission is unconfirmed does not reuse its nonce.
/// After a failed submission the account is reset with [`AccountNonces::reset`]
/// because the node may or may not have accepted the transaction.
#[derive(Clone, Debug, Default)]
pub struct AccountNonces {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

#[async_trait]
impl NonceManager for AccountNonces {
    async fn get_next_nonce<P, N>(&self, provider: &P, address: Address) -> TransportResult<u64>
    where
        P: Provider<N>,
        N: alloy_network::Network,
    {
        // Clone the slot out so the map shard is not locked across the await.
        let slot = {
            let entry = self
                .nonces
                .entry(address)
                .or_insert_with(|| Arc::new(Mutex::new(UNKNOWN_NONCE)));
            Arc::clone(entry.value())
        };

        let mut nonce = slot.lock().await;
        let next = if *nonce == UNKNOWN_NONCE {
            tracing::trace!(%address, "fetching pending nonce");
            provider.get_transaction_count(address).pending().await?
        } else {
            *nonce + 1
        };
        *nonce = next;
        Ok(next)
    }
}

impl AccountNonces {
    /// Forgets the cached nonce of `address`; the next transaction re-queries the node.
    pub async fn reset(&self, address: Address) {
        if let Some(slot) = self.nonces.get(&address).map(|e| Arc::clone(e.value())) {
            *slot.lock().await = UNKNOWN_NONCE;
            tracing::debug!(%address, "nonce reset after failed submission");
        }
    }

    /// Currently cached nonce of `address`, if one has been fetched.
    pub async fn cached(&self, address: Address) -> Option<u64> {
        let slot = self.nonces.get(&address).map(|e| Arc::clone(e.value()))?;
        let nonce = *slot.lock().await;
        (nonce != UNKNOWN_NONCE).then_some(nonce)
    }
}
