//! The gasless orchestrator: one entry point that takes a transaction intent
//! through the whole flow.
//!
//! ```text
//! send(intent, args, ctx)
//!   ├─ in-flight guard on intent.action_id
//!   ├─ Dispatcher: build ─► select mode ─► submit
//!   ├─ Ok(handle)               ─► OutcomeTracker (spawned) ─► on_confirmed | on_reverted
//!   ├─ Err(SponsorUnavailable)  ─► probe.refetch ─► RecoverySink::offer ─► Err
//!   └─ Err(other)               ─► Err
//! ```
//!
//! Each attempt publishes its [`AttemptState`] on a `watch` channel available
//! from [`Submission::state`] and owns a [`CancellationToken`] derived from the
//! orchestrator's parent token.

use dashmap::DashSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::chain::ChainContext;
use crate::dispatch::{AttemptState, DispatchError, Dispatched, Dispatcher};
use crate::paymaster::CapabilityProbe;
use crate::recovery::{FailedGaslessAttempt, RecoverySink};
use crate::settings::{SendOptions, SubmissionMode};
use crate::tracker::{Callbacks, OutcomeCallback, OutcomeTracker, TrackOutcome, TrackingHandle};
use crate::transaction::{
    BoxError, ChainObserver, Receipt, SubmissionError, SubmissionErrorCause, Submitter,
    TransactionBuilder, TransactionHandle,
};

/// Identifies one logical user action across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl ActionId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl Display for ActionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "action-{}", self.0)
    }
}

/// What the caller wants done: how to build the transaction and how to react
/// to its outcome.
///
/// Clones share the builder and callbacks and keep the same [`ActionId`].
pub struct TransactionIntent<A> {
    builder: Arc<dyn TransactionBuilder<A>>,
    on_confirmed: OutcomeCallback,
    on_reverted: OutcomeCallback,
    options: SendOptions,
    action_id: ActionId,
}

impl<A> Clone for TransactionIntent<A> {
    fn clone(&self) -> Self {
        Self {
            builder: Arc::clone(&self.builder),
            on_confirmed: Arc::clone(&self.on_confirmed),
            on_reverted: Arc::clone(&self.on_reverted),
            options: self.options,
            action_id: self.action_id,
        }
    }
}

impl<A> std::fmt::Debug for TransactionIntent<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionIntent")
            .field("action_id", &self.action_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<A> TransactionIntent<A> {
    /// Creates an intent with default options and a fresh action id.
    pub fn new(
        builder: impl TransactionBuilder<A> + 'static,
        on_confirmed: impl Fn(&Receipt) + Send + Sync + 'static,
        on_reverted: impl Fn(&Receipt) + Send + Sync + 'static,
    ) -> Self {
        Self {
            builder: Arc::new(builder),
            on_confirmed: Arc::new(on_confirmed),
            on_reverted: Arc::new(on_reverted),
            options: SendOptions::default(),
            action_id: ActionId::next(),
        }
    }

    pub fn with_options(mut self, options: SendOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_action_id(mut self, action_id: ActionId) -> Self {
        self.action_id = action_id;
        self
    }

    pub fn options(&self) -> SendOptions {
        self.options
    }

    pub fn action_id(&self) -> ActionId {
        self.action_id
    }

    pub fn builder(&self) -> &dyn TransactionBuilder<A> {
        self.builder.as_ref()
    }

    fn callbacks(&self) -> Callbacks {
        Callbacks::new(Arc::clone(&self.on_confirmed), Arc::clone(&self.on_reverted))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendTransactionError {
    /// The intent's builder failed; nothing was submitted.
    #[error("Failed to build transaction: {0}")]
    Build(#[source] BoxError),
    #[error("{mode} submission failed: {error}")]
    Submission {
        mode: SubmissionMode,
        #[source]
        error: SubmissionError,
    },
    #[error("{0} already has a transaction in flight")]
    AlreadyInFlight(ActionId),
    #[error("Attempt cancelled before submission")]
    Cancelled,
}

impl SendTransactionError {
    /// Cause of a failed submission, if the failure happened at submission.
    pub fn cause(&self) -> Option<SubmissionErrorCause> {
        match self {
            SendTransactionError::Submission { error, .. } => Some(error.cause),
            _ => None,
        }
    }

    /// A refused sponsored submission. The attempt was handed to the recovery sink.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SendTransactionError::Submission {
                mode: SubmissionMode::Sponsored,
                error: SubmissionError {
                    cause: SubmissionErrorCause::SponsorUnavailable,
                    ..
                },
            }
        )
    }
}

impl From<DispatchError> for SendTransactionError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Build(e) => SendTransactionError::Build(e),
            DispatchError::Submission { mode, error } => {
                SendTransactionError::Submission { mode, error }
            }
        }
    }
}

/// A submitted transaction whose outcome is being tracked.
///
/// Dropping a `Submission` tears the attempt down like [`Submission::cancel`]:
/// no outcome callback fires afterwards. Use [`Submission::detach`] to let
/// tracking run to completion on its own.
#[derive(Debug)]
pub struct Submission {
    pub handle: TransactionHandle,
    pub mode: SubmissionMode,
    cancel: CancellationToken,
    teardown: DropGuard,
    tracking: TrackingHandle,
    state: watch::Receiver<AttemptState>,
}

impl Submission {
    /// Tears the attempt down. The outcome callbacks will not fire afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Keeps tracking alive without this value; callbacks fire as usual.
    pub fn detach(self) -> TrackingHandle {
        let Submission {
            teardown, tracking, ..
        } = self;
        teardown.disarm();
        tracking
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receiver for the attempt's state transitions.
    pub fn state(&self) -> watch::Receiver<AttemptState> {
        self.state.clone()
    }

    /// Waits for tracking to finish.
    pub async fn outcome(self) -> TrackOutcome {
        let Submission {
            teardown, tracking, ..
        } = self;
        let outcome = tracking.outcome().await;
        teardown.disarm();
        outcome
    }
}

/// Removes the action id from the in-flight set on drop.
struct InFlightGuard {
    in_flight: Arc<DashSet<ActionId>>,
    action_id: ActionId,
}

impl InFlightGuard {
    fn acquire(in_flight: &Arc<DashSet<ActionId>>, action_id: ActionId) -> Option<Self> {
        in_flight.insert(action_id).then(|| Self {
            in_flight: Arc::clone(in_flight),
            action_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.action_id);
    }
}

/// Publishes attempt states and logs each transition.
struct StatePublisher {
    action_id: ActionId,
    sender: watch::Sender<AttemptState>,
}

impl StatePublisher {
    fn new(action_id: ActionId) -> (Self, watch::Receiver<AttemptState>) {
        let (sender, receiver) = watch::channel(AttemptState::Idle);
        (Self { action_id, sender }, receiver)
    }

    fn publish(&self, state: AttemptState) {
        tracing::debug!(action = %self.action_id, %state, "Attempt state changed");
        self.sender.send_replace(state);
    }
}

/// Runs transaction intents through dispatch, tracking and recovery.
#[derive(Debug)]
pub struct GaslessOrchestrator<P, S, O, R> {
    dispatcher: Dispatcher<P, S>,
    tracker: OutcomeTracker<O>,
    recovery: R,
    in_flight: Arc<DashSet<ActionId>>,
    cancel: CancellationToken,
}

impl<P, S, O, R> GaslessOrchestrator<P, S, O, R>
where
    P: CapabilityProbe + Sync,
    S: Submitter + Sync,
    O: ChainObserver + Send + Sync + 'static,
{
    pub fn new(dispatcher: Dispatcher<P, S>, tracker: OutcomeTracker<O>, recovery: R) -> Self {
        Self {
            dispatcher,
            tracker,
            recovery,
            in_flight: Arc::new(DashSet::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Derives every attempt's cancellation token from `parent`.
    pub fn with_cancellation(mut self, parent: CancellationToken) -> Self {
        self.cancel = parent;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher<P, S> {
        &self.dispatcher
    }

    pub fn recovery(&self) -> &R {
        &self.recovery
    }

    pub fn is_in_flight(&self, action_id: ActionId) -> bool {
        self.in_flight.contains(&action_id)
    }

    /// Sends one transaction for `intent`.
    ///
    /// Returns once the transaction is submitted; its outcome is delivered
    /// through the intent's callbacks. A refused sponsored submission is handed
    /// to the recovery sink, after the paymaster capability for the chain is
    /// refetched, and returned as an error for which
    /// [`SendTransactionError::is_recoverable`] holds.
    #[tracing::instrument(name = "gasless.send", skip_all, fields(action = %intent.action_id(), chain = %ctx.chain_id))]
    pub async fn send<A>(
        &self,
        intent: &TransactionIntent<A>,
        args: A,
        ctx: ChainContext,
    ) -> Result<Submission, SendTransactionError>
    where
        A: Clone + Send + Sync + 'static,
        R: RecoverySink<A>,
    {
        let action_id = intent.action_id();
        let _guard = InFlightGuard::acquire(&self.in_flight, action_id)
            .ok_or(SendTransactionError::AlreadyInFlight(action_id))?;

        let (states, state) = StatePublisher::new(action_id);
        let cancel = self.cancel.child_token();
        if cancel.is_cancelled() {
            states.publish(AttemptState::Cancelled);
            return Err(SendTransactionError::Cancelled);
        }

        let dispatched = self
            .dispatcher
            .dispatch_with_progress(intent.builder(), &args, intent.options(), &ctx, |s| {
                states.publish(s)
            })
            .await;

        match dispatched {
            Ok(Dispatched { handle, mode }) => {
                states.publish(AttemptState::Tracking(mode));
                let tracking = self.tracker.track_reporting(
                    handle,
                    intent.callbacks(),
                    cancel.clone(),
                    move |outcome| {
                        let terminal = match outcome {
                            TrackOutcome::Confirmed(_) => AttemptState::Confirmed,
                            TrackOutcome::Reverted(_) => AttemptState::Reverted,
                            TrackOutcome::Cancelled => AttemptState::Cancelled,
                            TrackOutcome::Failed(_) => AttemptState::FailedTerminal,
                        };
                        states.publish(terminal);
                    },
                );
                Ok(Submission {
                    handle,
                    mode,
                    teardown: cancel.clone().drop_guard(),
                    cancel,
                    tracking,
                    state,
                })
            }
            Err(DispatchError::Submission { mode, error })
                if mode.is_sponsored() && error.cause == SubmissionErrorCause::SponsorUnavailable =>
            {
                if let Err(e) = self.dispatcher.probe().refetch(ctx.chain_id).await {
                    tracing::warn!(error = %e, "Failed to refetch paymaster capability");
                }
                states.publish(AttemptState::FailedRecoverable);
                self.recovery.offer(FailedGaslessAttempt {
                    intent: intent.clone(),
                    mutation_args: args,
                    chain: ctx,
                    error: error.clone(),
                });
                Err(SendTransactionError::Submission { mode, error })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Transaction attempt failed");
                states.publish(AttemptState::FailedTerminal);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainId;
    use crate::recovery::{DiscardRecovery, RecoverySlot};
    use crate::settings::{FeatureFlags, GASLESS_TRANSACTIONS_FEATURE, UserChainSettings};
    use crate::transaction::{TerminalState, TransactionData};
    use alloy_primitives::{Address, TxHash};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    const CHAIN: ChainId = ChainId::new(324);

    struct Probe {
        refetches: AtomicUsize,
    }

    impl CapabilityProbe for Probe {
        type Error = String;

        async fn can_sponsor(&self, _chain_id: ChainId) -> Result<bool, Self::Error> {
            Ok(true)
        }

        async fn refetch(&self, _chain_id: ChainId) -> Result<bool, Self::Error> {
            self.refetches.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
    }

    /// Sponsored submissions wait for `release`; both paths can be made to fail.
    struct GatedSubmitter {
        release: Arc<Notify>,
        sponsored: Result<TxHash, SubmissionError>,
    }

    impl Submitter for GatedSubmitter {
        async fn submit_sponsored(
            &self,
            _tx: &TransactionData,
            ctx: &ChainContext,
        ) -> Result<TransactionHandle, SubmissionError> {
            self.release.notified().await;
            self.sponsored.clone().map(|hash| TransactionHandle {
                chain_id: ctx.chain_id,
                hash,
            })
        }

        async fn submit_standard(
            &self,
            _tx: &TransactionData,
            ctx: &ChainContext,
        ) -> Result<TransactionHandle, SubmissionError> {
            Ok(TransactionHandle {
                chain_id: ctx.chain_id,
                hash: TxHash::repeat_byte(0x5d),
            })
        }
    }

    struct PendingObserver;

    impl ChainObserver for PendingObserver {
        type Error = String;

        async fn await_terminal_state(
            &self,
            _handle: &TransactionHandle,
        ) -> Result<TerminalState, Self::Error> {
            std::future::pending().await
        }
    }

    fn orchestrator<R>(
        sponsored: Result<TxHash, SubmissionError>,
        recovery: R,
    ) -> (GaslessOrchestrator<Probe, GatedSubmitter, PendingObserver, R>, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        let dispatcher = Dispatcher::new(
            UserChainSettings::default(),
            FeatureFlags::new().enable(GASLESS_TRANSACTIONS_FEATURE, [CHAIN]),
            Probe {
                refetches: AtomicUsize::new(0),
            },
            GatedSubmitter {
                release: Arc::clone(&release),
                sponsored,
            },
        );
        let orchestrator =
            GaslessOrchestrator::new(dispatcher, OutcomeTracker::new(PendingObserver), recovery);
        (orchestrator, release)
    }

    fn intent() -> TransactionIntent<u32> {
        TransactionIntent::new(
            |_: u32| async { Ok::<_, BoxError>(TransactionData::default()) },
            |_| {},
            |_| {},
        )
    }

    fn ctx() -> ChainContext {
        ChainContext::new(CHAIN, Address::repeat_byte(0x11))
    }

    #[test]
    fn test_action_ids_are_unique_and_clones_keep_them() {
        let a = intent();
        let b = intent();
        assert_ne!(a.action_id(), b.action_id());
        assert_eq!(a.clone().action_id(), a.action_id());
        assert_eq!(
            a.clone().with_options(SendOptions::standard_only()).action_id(),
            a.action_id()
        );
    }

    #[tokio::test]
    async fn test_second_send_while_in_flight_is_rejected() {
        let (orchestrator, release) = orchestrator(Ok(TxHash::repeat_byte(0xab)), DiscardRecovery);
        let intent = intent();
        let first = orchestrator.send(&intent, 1, ctx());
        let second = async {
            tokio::task::yield_now().await;
            let result = orchestrator.send(&intent, 2, ctx()).await;
            release.notify_one();
            result
        };
        let (first, second) = tokio::join!(first, second);
        assert!(first.is_ok());
        assert!(matches!(
            second,
            Err(SendTransactionError::AlreadyInFlight(id)) if id == intent.action_id()
        ));
        assert!(!orchestrator.is_in_flight(intent.action_id()));
    }

    #[tokio::test]
    async fn test_sponsor_unavailable_refetches_then_offers() {
        let slot = Arc::new(RecoverySlot::<u32>::new());
        let (orchestrator, release) = orchestrator(
            Err(SubmissionError::sponsor_unavailable("refused")),
            Arc::clone(&slot),
        );
        release.notify_one();
        let err = orchestrator.send(&intent(), 9, ctx()).await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(
            orchestrator.dispatcher().probe().refetches.load(Ordering::SeqCst),
            1
        );
        let attempt = slot.take().unwrap();
        assert_eq!(attempt.mutation_args, 9);
        assert_eq!(attempt.chain, ctx());
    }

    #[tokio::test]
    async fn test_other_sponsored_failure_is_terminal() {
        let slot = Arc::new(RecoverySlot::<u32>::new());
        let (orchestrator, release) =
            orchestrator(Err(SubmissionError::user_rejected("denied")), Arc::clone(&slot));
        release.notify_one();
        let err = orchestrator.send(&intent(), 1, ctx()).await.unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(err.cause(), Some(SubmissionErrorCause::UserRejected));
        assert!(!slot.is_open());
        assert_eq!(
            orchestrator.dispatcher().probe().refetches.load(Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_retry_as_standard_keeps_action_and_submits_standard() {
        let slot = Arc::new(RecoverySlot::<u32>::new());
        let (orchestrator, release) = orchestrator(
            Err(SubmissionError::sponsor_unavailable("refused")),
            Arc::clone(&slot),
        );
        release.notify_one();
        let intent = intent();
        orchestrator.send(&intent, 3, ctx()).await.unwrap_err();
        let submission = slot.retry_as_standard(&orchestrator).await.unwrap().unwrap();
        assert_eq!(submission.mode, SubmissionMode::Standard);
        assert_eq!(submission.handle.hash, TxHash::repeat_byte(0x5d));
        assert!(!slot.is_open());
    }

    #[tokio::test]
    async fn test_cancel_publishes_cancelled_state() {
        let (orchestrator, release) = orchestrator(Ok(TxHash::repeat_byte(0xab)), DiscardRecovery);
        release.notify_one();
        let submission = orchestrator.send(&intent(), 1, ctx()).await.unwrap();
        let mut state = submission.state();
        assert_eq!(*state.borrow(), AttemptState::Tracking(SubmissionMode::Sponsored));
        submission.cancel();
        state
            .wait_for(|s| *s == AttemptState::Cancelled)
            .await
            .unwrap();
        assert_eq!(submission.outcome().await, TrackOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_dropped_submission_is_cancelled() {
        let (orchestrator, release) = orchestrator(Ok(TxHash::repeat_byte(0xab)), DiscardRecovery);
        release.notify_one();
        let submission = orchestrator.send(&intent(), 1, ctx()).await.unwrap();
        let token = submission.cancellation_token();
        let mut state = submission.state();
        drop(submission);
        assert!(token.is_cancelled());
        state
            .wait_for(|s| *s == AttemptState::Cancelled)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_detached_submission_keeps_tracking() {
        let (orchestrator, release) = orchestrator(Ok(TxHash::repeat_byte(0xab)), DiscardRecovery);
        release.notify_one();
        let submission = orchestrator.send(&intent(), 1, ctx()).await.unwrap();
        let token = submission.cancellation_token();
        let tracking = submission.detach();
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
        assert!(!tracking.is_finished());
    }

    #[tokio::test]
    async fn test_cancelled_parent_rejects_new_attempts() {
        let parent = CancellationToken::new();
        let (orchestrator, _release) = orchestrator(Ok(TxHash::repeat_byte(0xab)), DiscardRecovery);
        let orchestrator = orchestrator.with_cancellation(parent.clone());
        parent.cancel();
        let err = orchestrator.send(&intent(), 1, ctx()).await.unwrap_err();
        assert!(matches!(err, SendTransactionError::Cancelled));
    }
}
