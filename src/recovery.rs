//! Recovery from refused sponsorship.
//!
//! When the paymaster refuses a sponsored submission, the orchestrator hands a
//! [`FailedGaslessAttempt`] to a [`RecoverySink`]. The snapshot carries everything
//! needed to re-run the attempt with the fee paid by the account:
//! the original intent, its mutation arguments and the chain context.
//!
//! [`RecoverySlot`] is the stock sink. It holds at most one attempt, the latest,
//! until it is retried or dismissed.

use std::sync::Mutex;
use tokio::sync::Notify;

use crate::chain::ChainContext;
use crate::orchestrator::{GaslessOrchestrator, SendTransactionError, Submission, TransactionIntent};
use crate::paymaster::CapabilityProbe;
use crate::settings::SendOptions;
use crate::transaction::{ChainObserver, SubmissionError, Submitter};

/// Snapshot of an attempt whose sponsored submission was refused.
pub struct FailedGaslessAttempt<A> {
    pub intent: TransactionIntent<A>,
    pub mutation_args: A,
    pub chain: ChainContext,
    pub error: SubmissionError,
}

impl<A: std::fmt::Debug> std::fmt::Debug for FailedGaslessAttempt<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailedGaslessAttempt")
            .field("action_id", &self.intent.action_id())
            .field("mutation_args", &self.mutation_args)
            .field("chain", &self.chain)
            .field("error", &self.error)
            .finish()
    }
}

impl<A> FailedGaslessAttempt<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Re-runs the whole flow for this attempt with sponsorship disabled.
    ///
    /// The intent keeps its action id and callbacks; only `try_gasless` changes.
    pub async fn retry_as_standard<P, S, O, R>(
        self,
        orchestrator: &GaslessOrchestrator<P, S, O, R>,
    ) -> Result<Submission, SendTransactionError>
    where
        P: CapabilityProbe + Sync,
        S: Submitter + Sync,
        O: ChainObserver + Send + Sync + 'static,
        R: RecoverySink<A>,
    {
        tracing::info!(action = %self.intent.action_id(), chain = %self.chain.chain_id, "Retrying with standard fees");
        let intent = self.intent.with_options(SendOptions::standard_only());
        orchestrator.send(&intent, self.mutation_args, self.chain).await
    }
}

/// Receives attempts that can be retried without sponsorship.
pub trait RecoverySink<A> {
    fn offer(&self, attempt: FailedGaslessAttempt<A>);
}

impl<A, T: RecoverySink<A>> RecoverySink<A> for std::sync::Arc<T> {
    fn offer(&self, attempt: FailedGaslessAttempt<A>) {
        (**self).offer(attempt)
    }
}

/// Sink that drops every attempt. For callers that never fall back.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardRecovery;

impl<A> RecoverySink<A> for DiscardRecovery {
    fn offer(&self, attempt: FailedGaslessAttempt<A>) {
        tracing::debug!(action = %attempt.intent.action_id(), "Discarding failed sponsored attempt");
    }
}

/// Holds the most recent failed attempt until it is taken or dismissed.
///
/// A newer attempt replaces an unclaimed older one.
pub struct RecoverySlot<A> {
    pending: Mutex<Option<FailedGaslessAttempt<A>>>,
    opened: Notify,
}

impl<A> Default for RecoverySlot<A> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(None),
            opened: Notify::new(),
        }
    }
}

impl<A> std::fmt::Debug for RecoverySlot<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoverySlot")
            .field("open", &self.is_open())
            .finish()
    }
}

impl<A> RecoverySlot<A> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<FailedGaslessAttempt<A>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Removes and returns the held attempt.
    pub fn take(&self) -> Option<FailedGaslessAttempt<A>> {
        self.lock().take()
    }

    /// Discards the held attempt. Returns whether one was held.
    pub fn dismiss(&self) -> bool {
        let dismissed = self.take();
        if let Some(attempt) = &dismissed {
            tracing::debug!(action = %attempt.intent.action_id(), "Dismissed failed sponsored attempt");
        }
        dismissed.is_some()
    }

    /// Waits until an attempt is held, then takes it.
    pub async fn wait(&self) -> FailedGaslessAttempt<A> {
        loop {
            let opened = self.opened.notified();
            if let Some(attempt) = self.take() {
                return attempt;
            }
            opened.await;
        }
    }
}

impl<A> RecoverySlot<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Takes the held attempt and retries it as standard.
    ///
    /// Returns `None` if no attempt is held.
    pub async fn retry_as_standard<P, S, O, R>(
        &self,
        orchestrator: &GaslessOrchestrator<P, S, O, R>,
    ) -> Option<Result<Submission, SendTransactionError>>
    where
        P: CapabilityProbe + Sync,
        S: Submitter + Sync,
        O: ChainObserver + Send + Sync + 'static,
        R: RecoverySink<A>,
    {
        let attempt = self.take()?;
        Some(attempt.retry_as_standard(orchestrator).await)
    }
}

impl<A> RecoverySink<A> for RecoverySlot<A> {
    fn offer(&self, attempt: FailedGaslessAttempt<A>) {
        tracing::info!(
            action = %attempt.intent.action_id(),
            chain = %attempt.chain.chain_id,
            error = %attempt.error,
            "Sponsored submission refused, offering standard retry"
        );
        if self.lock().replace(attempt).is_some() {
            tracing::debug!("Replaced an unclaimed failed attempt");
        }
        self.opened.notify_one();
    }
}
