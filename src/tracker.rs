//! Outcome tracking for submitted transactions.
//!
//! [`OutcomeTracker::track`] spawns a task that waits for the transaction to reach a
//! terminal state and then fires exactly one of the two [`Callbacks`]. The callbacks
//! are moved into the task, so neither can run twice. Cancelling the attempt's token
//! before the outcome is known (or before the callback runs) suppresses both.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transaction::{ChainObserver, Receipt, TerminalState, TransactionHandle};

/// Caller-supplied reaction to a receipt.
pub type OutcomeCallback = Arc<dyn Fn(&Receipt) + Send + Sync>;

/// The pair of outcome callbacks for one attempt. Consumed by the tracker.
pub struct Callbacks {
    pub on_confirmed: OutcomeCallback,
    pub on_reverted: OutcomeCallback,
}

impl Callbacks {
    pub fn new(on_confirmed: OutcomeCallback, on_reverted: OutcomeCallback) -> Self {
        Self {
            on_confirmed,
            on_reverted,
        }
    }

    fn fire(self, state: &TerminalState) {
        match state {
            TerminalState::Confirmed(receipt) => (self.on_confirmed)(receipt),
            TerminalState::Reverted(receipt) => (self.on_reverted)(receipt),
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

/// How tracking of one transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Confirmed(Receipt),
    Reverted(Receipt),
    /// Torn down before the outcome was delivered. No callback fired.
    Cancelled,
    /// The observer gave up. No callback fired.
    Failed(String),
}

impl From<TerminalState> for TrackOutcome {
    fn from(state: TerminalState) -> Self {
        match state {
            TerminalState::Confirmed(receipt) => TrackOutcome::Confirmed(receipt),
            TerminalState::Reverted(receipt) => TrackOutcome::Reverted(receipt),
        }
    }
}

/// Handle to a running tracking task.
#[derive(Debug)]
pub struct TrackingHandle {
    task: JoinHandle<TrackOutcome>,
}

impl TrackingHandle {
    /// Waits for the tracking task to finish.
    pub async fn outcome(self) -> TrackOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => TrackOutcome::Cancelled,
            Err(e) => TrackOutcome::Failed(format!("tracking task panicked: {e}")),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Waits for submitted transactions to settle.
#[derive(Debug, Clone)]
pub struct OutcomeTracker<O> {
    observer: Arc<O>,
}

impl<O> OutcomeTracker<O>
where
    O: ChainObserver + Send + Sync + 'static,
{
    pub fn new(observer: O) -> Self {
        Self {
            observer: Arc::new(observer),
        }
    }

    /// Spawns a task that waits for `handle` to confirm or revert and fires the
    /// matching callback, unless `cancel` fires first.
    ///
    /// No retries and no timeout: the task lives as long as the observer waits.
    pub fn track(
        &self,
        handle: TransactionHandle,
        callbacks: Callbacks,
        cancel: CancellationToken,
    ) -> TrackingHandle {
        self.track_reporting(handle, callbacks, cancel, |_| {})
    }

    /// Like [`OutcomeTracker::track`], passing the final outcome to `report`
    /// once the task is done, whatever the outcome.
    pub fn track_reporting(
        &self,
        handle: TransactionHandle,
        callbacks: Callbacks,
        cancel: CancellationToken,
        report: impl FnOnce(&TrackOutcome) + Send + 'static,
    ) -> TrackingHandle {
        let observer = Arc::clone(&self.observer);
        let span = tracing::info_span!("track_outcome", %handle);
        let task = tokio::spawn(tracing::Instrument::instrument(
            async move {
                let outcome = await_outcome(observer.as_ref(), handle, callbacks, cancel).await;
                report(&outcome);
                outcome
            },
            span,
        ));
        TrackingHandle { task }
    }
}

async fn await_outcome<O: ChainObserver>(
    observer: &O,
    handle: TransactionHandle,
    callbacks: Callbacks,
    cancel: CancellationToken,
) -> TrackOutcome {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = observer.await_terminal_state(&handle) => Some(result),
    };
    let state = match result {
        None => {
            tracing::debug!("Tracking cancelled");
            return TrackOutcome::Cancelled;
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Failed to observe transaction outcome");
            return TrackOutcome::Failed(e.to_string());
        }
        Some(Ok(state)) => state,
    };
    if cancel.is_cancelled() {
        tracing::debug!("Tracking cancelled before delivering outcome");
        return TrackOutcome::Cancelled;
    }
    tracing::info!(
        receipt = ?state.receipt(),
        confirmed = matches!(state, TerminalState::Confirmed(_)),
        "Transaction settled"
    );
    callbacks.fire(&state);
    state.into()
}
