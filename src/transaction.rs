//! Transaction payloads, handles, outcomes, and the collaborator traits the
//! dispatcher and tracker are generic over.
//!
//! The orchestration core never talks to a chain directly. It goes through:
//!
//! - [`TransactionBuilder`] - caller-supplied, turns mutation arguments into [`TransactionData`]
//! - [`Submitter`] - sends [`TransactionData`] either sponsored or standard
//! - [`ChainObserver`] - waits for a [`TransactionHandle`] to reach a [`TerminalState`]
//!
//! [`crate::chain::eip155`] provides the alloy-backed implementations.

use alloy_primitives::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

use crate::chain::{ChainContext, ChainId};

/// Boxed error type used for failures coming from caller-supplied code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Prepared, unsigned transaction produced by a [`TransactionBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionData {
    /// Target contract or account.
    pub to: Address,
    /// Encoded call data.
    #[serde(default)]
    pub data: Bytes,
    /// Native value sent along, in wei.
    #[serde(default)]
    pub value: U256,
}

/// Identifier of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle {
    pub chain_id: ChainId,
    pub hash: TxHash,
}

impl Display for TransactionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.hash, self.chain_id)
    }
}

/// Receipt summary handed to outcome callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

/// Final on-chain state of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalState {
    Confirmed(Receipt),
    Reverted(Receipt),
}

impl TerminalState {
    pub fn receipt(&self) -> &Receipt {
        match self {
            TerminalState::Confirmed(receipt) | TerminalState::Reverted(receipt) => receipt,
        }
    }
}

/// Why a submission failed.
///
/// `code` strings match the error codes the paymaster relay and the wallet layer report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionErrorCause {
    /// The account holder refused to sign.
    UserRejected,
    /// The sponsor could not or would not cover the transaction fee.
    SponsorUnavailable,
    /// RPC or relay unreachable.
    Network,
    Other,
}

impl SubmissionErrorCause {
    pub fn code(&self) -> &'static str {
        match self {
            SubmissionErrorCause::UserRejected => "userRejected",
            SubmissionErrorCause::SponsorUnavailable => "gaslessTransactionNotAvailable",
            SubmissionErrorCause::Network => "networkError",
            SubmissionErrorCause::Other => "somethingWentWrong",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "userRejected" => SubmissionErrorCause::UserRejected,
            "gaslessTransactionNotAvailable" => SubmissionErrorCause::SponsorUnavailable,
            "networkError" => SubmissionErrorCause::Network,
            _ => SubmissionErrorCause::Other,
        }
    }
}

impl Display for SubmissionErrorCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A failed submission attempt, before any transaction handle exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{cause}: {message}")]
pub struct SubmissionError {
    pub cause: SubmissionErrorCause,
    pub message: String,
}

impl SubmissionError {
    pub fn new(cause: SubmissionErrorCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }

    pub fn user_rejected(message: impl Into<String>) -> Self {
        Self::new(SubmissionErrorCause::UserRejected, message)
    }

    pub fn sponsor_unavailable(message: impl Into<String>) -> Self {
        Self::new(SubmissionErrorCause::SponsorUnavailable, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(SubmissionErrorCause::Network, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(SubmissionErrorCause::Other, message)
    }
}

/// Turns mutation arguments into a prepared transaction.
///
/// Implemented for any `Fn(A) -> impl Future<Output = Result<TransactionData, BoxError>>`,
/// so plain async closures can be used as builders.
#[async_trait::async_trait]
pub trait TransactionBuilder<A>: Send + Sync {
    async fn build(&self, args: &A) -> Result<TransactionData, BoxError>;
}

#[async_trait::async_trait]
impl<A, F, Fut> TransactionBuilder<A> for F
where
    A: Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TransactionData, BoxError>> + Send + 'static,
{
    async fn build(&self, args: &A) -> Result<TransactionData, BoxError> {
        (self)(args.clone()).await
    }
}

/// Sends a prepared transaction through one of the two fee paths.
pub trait Submitter {
    /// Sends with the fee covered by the paymaster.
    fn submit_sponsored(
        &self,
        tx: &TransactionData,
        ctx: &ChainContext,
    ) -> impl Future<Output = Result<TransactionHandle, SubmissionError>> + Send;

    /// Sends with the fee paid by `ctx.account`.
    fn submit_standard(
        &self,
        tx: &TransactionData,
        ctx: &ChainContext,
    ) -> impl Future<Output = Result<TransactionHandle, SubmissionError>> + Send;
}

/// Watches a submitted transaction until it is confirmed or reverted.
///
/// Implementations decide how long to wait; the tracker imposes no timeout.
pub trait ChainObserver {
    type Error: Debug + Display + Send;

    fn await_terminal_state(
        &self,
        handle: &TransactionHandle,
    ) -> impl Future<Output = Result<TerminalState, Self::Error>> + Send;
}

impl<T: Submitter + Sync> Submitter for std::sync::Arc<T> {
    fn submit_sponsored(
        &self,
        tx: &TransactionData,
        ctx: &ChainContext,
    ) -> impl Future<Output = Result<TransactionHandle, SubmissionError>> + Send {
        (**self).submit_sponsored(tx, ctx)
    }

    fn submit_standard(
        &self,
        tx: &TransactionData,
        ctx: &ChainContext,
    ) -> impl Future<Output = Result<TransactionHandle, SubmissionError>> + Send {
        (**self).submit_standard(tx, ctx)
    }
}

impl<T: ChainObserver + Sync> ChainObserver for std::sync::Arc<T> {
    type Error = T::Error;

    fn await_terminal_state(
        &self,
        handle: &TransactionHandle,
    ) -> impl Future<Output = Result<TerminalState, Self::Error>> + Send {
        (**self).await_terminal_state(handle)
    }
}
