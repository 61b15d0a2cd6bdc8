use alloy_provider::PendingTransactionError;

use crate::chain::eip155::Eip155ChainProvider;
use crate::chain::{ChainContext, ChainId, ChainRegistry};
use crate::paymaster::PaymasterClient;
use crate::transaction::{
    ChainObserver, SubmissionError, Submitter, TerminalState, TransactionData, TransactionHandle,
};

/// [`Submitter`] over the configured EVM chains.
///
/// Standard submissions go through the chain's provider. Sponsored submissions
/// are signed by the account and relayed through the paymaster; without a
/// configured paymaster they fail as `SponsorUnavailable`.
#[derive(Debug, Clone)]
pub struct Eip155Submitter {
    chains: ChainRegistry,
    paymaster: Option<PaymasterClient>,
}

impl Eip155Submitter {
    pub fn new(chains: ChainRegistry, paymaster: Option<PaymasterClient>) -> Self {
        Self { chains, paymaster }
    }

    fn provider(&self, chain_id: ChainId) -> Result<&Eip155ChainProvider, SubmissionError> {
        self.chains
            .by_chain_id(chain_id)
            .map(|p| p.as_ref())
            .ok_or_else(|| SubmissionError::other(format!("chain {chain_id} is not configured")))
    }
}

impl Submitter for Eip155Submitter {
    async fn submit_sponsored(
        &self,
        tx: &TransactionData,
        ctx: &ChainContext,
    ) -> Result<TransactionHandle, SubmissionError> {
        let paymaster = self.paymaster.as_ref().ok_or_else(|| {
            SubmissionError::sponsor_unavailable("no paymaster configured")
        })?;
        let provider = self.provider(ctx.chain_id)?;
        let request = provider.sign_sponsor_request(tx, ctx.account).await?;
        let response = paymaster.sponsor(&request).await?;
        Ok(TransactionHandle {
            chain_id: ctx.chain_id,
            hash: response.transaction_hash,
        })
    }

    async fn submit_standard(
        &self,
        tx: &TransactionData,
        ctx: &ChainContext,
    ) -> Result<TransactionHandle, SubmissionError> {
        let provider = self.provider(ctx.chain_id)?;
        let hash = provider.send_standard(tx, ctx.account).await?;
        Ok(TransactionHandle {
            chain_id: ctx.chain_id,
            hash,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    #[error("chain {0} is not configured")]
    UnknownChain(ChainId),
    #[error(transparent)]
    PendingTransaction(#[from] PendingTransactionError),
}

/// [`ChainObserver`] that waits for receipts on the configured EVM chains.
#[derive(Debug, Clone)]
pub struct Eip155Observer {
    chains: ChainRegistry,
}

impl Eip155Observer {
    pub fn new(chains: ChainRegistry) -> Self {
        Self { chains }
    }
}

impl ChainObserver for Eip155Observer {
    type Error = ObserveError;

    async fn await_terminal_state(
        &self,
        handle: &TransactionHandle,
    ) -> Result<TerminalState, Self::Error> {
        let provider = self
            .chains
            .by_chain_id(handle.chain_id)
            .ok_or(ObserveError::UnknownChain(handle.chain_id))?;
        Ok(provider.await_terminal_state(handle.hash).await?)
    }
}
