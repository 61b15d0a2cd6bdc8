use alloy_json_rpc::RpcError;
use alloy_network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy_primitives::{Address, TxHash};
use alloy_provider::fillers::{BlobGasFiller, ChainIdFiller, GasFiller, JoinFill, NonceFiller};
use alloy_provider::{
    DynProvider, PendingTransactionBuilder, PendingTransactionError, Provider, ProviderBuilder,
};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::TransportError;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use std::num::NonZeroUsize;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceBuilder;
use tracing::Instrument;

use crate::chain::eip155::AccountNonces;
use crate::chain::{ChainId, FromConfig};
use crate::config::{Eip155ChainConfig, RpcConfig};
use crate::paymaster::SponsorRequest;
use crate::transaction::{
    Receipt, SubmissionError, SubmissionErrorCause, TerminalState, TransactionData,
};

/// EIP-1193 error code for a request the account holder rejected.
pub const USER_REJECTED_REQUEST_CODE: i64 = 4001;

/// Provider for one EVM chain and the account that submits on it.
///
/// Handles:
/// - standard submission with the account paying gas (EIP-1559 or legacy pricing)
/// - signing of sponsored relay requests
/// - waiting for receipts with the configured number of confirmations
///
/// If a standard submission fails, the account's nonce is reset so the next
/// transaction re-reads it from the node.
pub struct Eip155ChainProvider {
    chain_id: ChainId,
    eip1559: bool,
    confirmations: u64,
    inner: DynProvider,
    signer: PrivateKeySigner,
    nonces: AccountNonces,
}

impl std::fmt::Debug for Eip155ChainProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Eip155ChainProvider")
            .field("chain_id", &self.chain_id)
            .field("account", &self.signer.address())
            .field("eip1559", &self.eip1559)
            .field("confirmations", &self.confirmations)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Eip155ProviderError {
    #[error("No HTTP RPC endpoint configured for {0}")]
    NoRpc(ChainId),
    #[error("Invalid signer key for {0}: {1}")]
    Signer(ChainId, String),
}

impl Eip155ChainProvider {
    /// Builds an RPC client over all HTTP endpoints, each throttled to its
    /// rate limit, behind a fallback layer.
    pub fn rpc_client(chain_id: ChainId, rpc: &[RpcConfig]) -> Result<RpcClient, Eip155ProviderError> {
        let transports = rpc
            .iter()
            .filter_map(|provider_config| {
                let scheme = provider_config.http.scheme();
                if scheme != "http" && scheme != "https" {
                    return None;
                }
                let rpc_url = provider_config.http.clone();
                tracing::info!(chain=%chain_id, rpc_url=%rpc_url, rate_limit=?provider_config.rate_limit, "Using HTTP transport");
                let rate_limit = provider_config.rate_limit.unwrap_or(u32::MAX);
                let service = ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit))
                    .service(Http::new(rpc_url));
                Some(service)
            })
            .collect::<Vec<_>>();
        let transport_count =
            NonZeroUsize::new(transports.len()).ok_or(Eip155ProviderError::NoRpc(chain_id))?;
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(transport_count))
            .service(transports);
        Ok(RpcClient::new(fallback, false))
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Address of the submitting account.
    pub fn account(&self) -> Address {
        self.signer.address()
    }

    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }

    fn ensure_account(&self, account: Address) -> Result<(), SubmissionError> {
        if account == self.account() {
            Ok(())
        } else {
            Err(SubmissionError::other(format!(
                "no signer for account {account} on {}",
                self.chain_id
            )))
        }
    }

    /// Sends `tx` from `from` with the account paying gas. Returns the transaction hash.
    #[tracing::instrument(name = "eip155.submit_standard", skip_all, fields(chain = %self.chain_id, to = %tx.to), err)]
    pub async fn send_standard(
        &self,
        tx: &TransactionData,
        from: Address,
    ) -> Result<TxHash, SubmissionError> {
        self.ensure_account(from)?;
        let mut txr = TransactionRequest::default()
            .with_from(from)
            .with_to(tx.to)
            .with_input(tx.data.clone())
            .with_value(tx.value);

        if !self.eip1559 {
            let gas: u128 = self
                .inner
                .get_gas_price()
                .instrument(tracing::info_span!("get_gas_price"))
                .await
                .map_err(|e| classify_transport_error(&e))?;
            txr.set_gas_price(gas);
        }

        match self.inner.send_transaction(txr).await {
            Ok(pending) => Ok(*pending.tx_hash()),
            Err(e) => {
                self.nonces.reset(from).await;
                Err(classify_transport_error(&e))
            }
        }
    }

    /// Signs a relay request for `tx` so the paymaster can submit it on the account's behalf.
    ///
    /// Each call signs a fresh nonce, so a request cannot be replayed as a later one.
    pub async fn sign_sponsor_request(
        &self,
        tx: &TransactionData,
        from: Address,
    ) -> Result<SponsorRequest, SubmissionError> {
        self.ensure_account(from)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SubmissionError::other(format!("system clock before unix epoch: {e}")))?
            .as_secs();
        let mut request = SponsorRequest::unsigned(self.chain_id.inner(), from, tx, now);
        let signature = self
            .signer
            .sign_hash(&request.signing_hash())
            .await
            .map_err(|e| SubmissionError::other(format!("failed to sign sponsor request: {e}")))?;
        request.signature = signature.as_bytes().into();
        Ok(request)
    }

    /// Waits until `hash` has the configured number of confirmations.
    ///
    /// No timeout: the wait ends when the node reports the receipt.
    #[tracing::instrument(name = "eip155.await_receipt", skip(self), fields(chain = %self.chain_id), err)]
    pub async fn await_terminal_state(
        &self,
        hash: TxHash,
    ) -> Result<TerminalState, PendingTransactionError> {
        let receipt = PendingTransactionBuilder::new(self.inner.root().clone(), hash)
            .with_required_confirmations(self.confirmations)
            .with_timeout(None)
            .get_receipt()
            .await?;
        let summary = Receipt {
            transaction_hash: ReceiptResponse::transaction_hash(&receipt),
            block_number: ReceiptResponse::block_number(&receipt),
            gas_used: Some(ReceiptResponse::gas_used(&receipt)),
        };
        if ReceiptResponse::status(&receipt) {
            Ok(TerminalState::Confirmed(summary))
        } else {
            Ok(TerminalState::Reverted(summary))
        }
    }
}

/// Maps an RPC failure to a submission cause: EIP-1193 `4001` is a user
/// rejection, an unreachable node is a network error, anything else is `Other`.
pub fn classify_transport_error(err: &TransportError) -> SubmissionError {
    let cause = match err {
        RpcError::ErrorResp(payload) if payload.code == USER_REJECTED_REQUEST_CODE => {
            SubmissionErrorCause::UserRejected
        }
        RpcError::Transport(_) => SubmissionErrorCause::Network,
        _ => SubmissionErrorCause::Other,
    };
    SubmissionError::new(cause, err.to_string())
}

#[async_trait::async_trait]
impl FromConfig<Eip155ChainConfig> for Eip155ChainProvider {
    async fn from_config(config: &Eip155ChainConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let chain_id = config.chain_id();
        let signer = PrivateKeySigner::from_bytes(config.signer().as_b256())
            .map_err(|e| Eip155ProviderError::Signer(chain_id, e.to_string()))?
            .with_chain_id(Some(chain_id.inner()));
        let wallet = EthereumWallet::from(signer.clone());

        let client = Self::rpc_client(chain_id, config.rpc())?;

        let nonces = AccountNonces::default();
        // Gas -> BlobGas -> Nonce -> ChainId, then the wallet signs.
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(NonceFiller::new(nonces.clone()), ChainIdFiller::default()),
            ),
        );
        let inner = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_client(client)
            .erased();

        tracing::info!(chain=%chain_id, account=%signer.address(), "Using EVM provider");

        Ok(Self {
            chain_id,
            eip1559: config.eip1559(),
            confirmations: config.confirmations(),
            inner,
            signer,
            nonces,
        })
    }
}
