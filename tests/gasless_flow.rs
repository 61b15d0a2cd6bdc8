use alloy_primitives::{Address, TxHash, U256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gasless_tx::chain::{ChainContext, ChainId};
use gasless_tx::dispatch::{AttemptState, Dispatcher};
use gasless_tx::orchestrator::{GaslessOrchestrator, SendTransactionError, TransactionIntent};
use gasless_tx::paymaster::CapabilityProbe;
use gasless_tx::recovery::{FailedGaslessAttempt, RecoverySink};
use gasless_tx::settings::{
    FeatureFlags, GASLESS_TRANSACTIONS_FEATURE, SendOptions, SubmissionMode, UserChainSettings,
};
use gasless_tx::tracker::{OutcomeTracker, TrackOutcome};
use gasless_tx::transaction::{
    BoxError, ChainObserver, Receipt, SubmissionError, SubmissionErrorCause, Submitter,
    TerminalState, TransactionData, TransactionHandle,
};

const ZKSYNC: ChainId = ChainId::new(324);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Probe,
    Refetch,
    Submit(SubmissionMode),
    Offer,
}

type EventLog = Arc<Mutex<Vec<Event>>>;

fn record(log: &EventLog, event: Event) {
    log.lock().unwrap().push(event);
}

struct MockProbe {
    can_sponsor: bool,
    log: EventLog,
}

impl CapabilityProbe for MockProbe {
    type Error = String;

    async fn can_sponsor(&self, _chain_id: ChainId) -> Result<bool, Self::Error> {
        record(&self.log, Event::Probe);
        Ok(self.can_sponsor)
    }

    async fn refetch(&self, _chain_id: ChainId) -> Result<bool, Self::Error> {
        record(&self.log, Event::Refetch);
        Ok(false)
    }
}

struct MockSubmitter {
    sponsored: Result<TxHash, SubmissionError>,
    standard: Result<TxHash, SubmissionError>,
    log: EventLog,
}

impl Submitter for MockSubmitter {
    async fn submit_sponsored(
        &self,
        _tx: &TransactionData,
        ctx: &ChainContext,
    ) -> Result<TransactionHandle, SubmissionError> {
        record(&self.log, Event::Submit(SubmissionMode::Sponsored));
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
        record(&self.log, Event::Submit(SubmissionMode::Standard));
        self.standard.clone().map(|hash| TransactionHandle {
            chain_id: ctx.chain_id,
            hash,
        })
    }
}

struct MockObserver {
    reverted: bool,
}

impl ChainObserver for MockObserver {
    type Error = String;

    async fn await_terminal_state(
        &self,
        handle: &TransactionHandle,
    ) -> Result<TerminalState, Self::Error> {
        let receipt = Receipt {
            transaction_hash: handle.hash,
            block_number: Some(42),
            gas_used: Some(21_000),
        };
        if self.reverted {
            Ok(TerminalState::Reverted(receipt))
        } else {
            Ok(TerminalState::Confirmed(receipt))
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    log: EventLog,
    attempts: Mutex<Vec<FailedGaslessAttempt<u64>>>,
}

impl RecoverySink<u64> for RecordingSink {
    fn offer(&self, attempt: FailedGaslessAttempt<u64>) {
        record(&self.log, Event::Offer);
        self.attempts.lock().unwrap().push(attempt);
    }
}

struct Eligibility {
    user_opt_in: bool,
    feature_enabled: bool,
    paymaster_can_sponsor: bool,
}

impl Eligibility {
    fn all() -> Self {
        Self {
            user_opt_in: true,
            feature_enabled: true,
            paymaster_can_sponsor: true,
        }
    }
}

struct Harness {
    orchestrator: GaslessOrchestrator<MockProbe, MockSubmitter, MockObserver, Arc<RecordingSink>>,
    sink: Arc<RecordingSink>,
    log: EventLog,
}

struct Outcomes {
    builds: Arc<AtomicUsize>,
    confirmed: Arc<Mutex<Vec<Receipt>>>,
    reverted: Arc<Mutex<Vec<Receipt>>>,
}

fn handle_abc() -> TxHash {
    TxHash::left_padding_from(&[0x0a, 0xbc])
}

fn harness(
    eligibility: Eligibility,
    sponsored: Result<TxHash, SubmissionError>,
    reverted: bool,
) -> Harness {
    let log = EventLog::default();
    let settings = UserChainSettings::default();
    settings.set_gasless_transactions(ZKSYNC, eligibility.user_opt_in);
    let mut features = FeatureFlags::new();
    if eligibility.feature_enabled {
        features = features.enable(GASLESS_TRANSACTIONS_FEATURE, [ZKSYNC]);
    }
    let dispatcher = Dispatcher::new(
        settings,
        features,
        MockProbe {
            can_sponsor: eligibility.paymaster_can_sponsor,
            log: Arc::clone(&log),
        },
        MockSubmitter {
            sponsored,
            standard: Ok(TxHash::repeat_byte(0x5d)),
            log: Arc::clone(&log),
        },
    );
    let sink = Arc::new(RecordingSink {
        log: Arc::clone(&log),
        ..Default::default()
    });
    let orchestrator = GaslessOrchestrator::new(
        dispatcher,
        OutcomeTracker::new(MockObserver { reverted }),
        Arc::clone(&sink),
    );
    Harness {
        orchestrator,
        sink,
        log,
    }
}

fn transfer_intent() -> (TransactionIntent<u64>, Outcomes) {
    let builds = Arc::new(AtomicUsize::new(0));
    let confirmed = Arc::new(Mutex::new(Vec::new()));
    let reverted = Arc::new(Mutex::new(Vec::new()));
    let intent = {
        let builds = Arc::clone(&builds);
        let confirmed = Arc::clone(&confirmed);
        let reverted = Arc::clone(&reverted);
        TransactionIntent::new(
            move |amount: u64| {
                builds.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok::<_, BoxError>(TransactionData {
                        to: Address::repeat_byte(0xee),
                        value: U256::from(amount),
                        ..Default::default()
                    })
                }
            },
            move |receipt: &Receipt| confirmed.lock().unwrap().push(receipt.clone()),
            move |receipt: &Receipt| reverted.lock().unwrap().push(receipt.clone()),
        )
    };
    (
        intent,
        Outcomes {
            builds,
            confirmed,
            reverted,
        },
    )
}

fn ctx() -> ChainContext {
    ChainContext::new(ZKSYNC, Address::repeat_byte(0x11))
}

#[tokio::test]
async fn test_mode_is_sponsored_iff_all_inputs_hold() {
    for bits in 0..8u8 {
        let eligibility = Eligibility {
            user_opt_in: bits & 1 != 0,
            feature_enabled: bits & 2 != 0,
            paymaster_can_sponsor: bits & 4 != 0,
        };
        let eligible = bits == 7;
        let harness = harness(eligibility, Ok(handle_abc()), false);
        let (intent, outcomes) = transfer_intent();
        let submission = harness
            .orchestrator
            .send(&intent, 100, ctx())
            .await
            .unwrap_or_else(|e| panic!("inputs {bits:03b} failed: {e}"));
        let expected = if eligible {
            SubmissionMode::Sponsored
        } else {
            SubmissionMode::Standard
        };
        assert_eq!(submission.mode, expected, "inputs {bits:03b}");
        assert_eq!(outcomes.builds.load(Ordering::SeqCst), 1, "inputs {bits:03b}");
        assert!(harness.sink.attempts.lock().unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_explicit_opt_out_sends_standard() {
    let harness = harness(Eligibility::all(), Ok(handle_abc()), false);
    let (intent, outcomes) = transfer_intent();
    let intent = intent.with_options(SendOptions::standard_only());
    let submission = harness.orchestrator.send(&intent, 1, ctx()).await.unwrap();
    assert_eq!(submission.mode, SubmissionMode::Standard);
    assert_eq!(outcomes.builds.load(Ordering::SeqCst), 1);
    assert_eq!(
        *harness.log.lock().unwrap(),
        vec![Event::Submit(SubmissionMode::Standard)]
    );
}

#[tokio::test]
async fn test_sponsored_handle_confirms_once() {
    let harness = harness(Eligibility::all(), Ok(handle_abc()), false);
    let (intent, outcomes) = transfer_intent();
    let submission = harness.orchestrator.send(&intent, 5, ctx()).await.unwrap();
    assert_eq!(submission.mode, SubmissionMode::Sponsored);
    assert_eq!(submission.handle.hash, handle_abc());

    let state = submission.state();
    assert!(matches!(submission.outcome().await, TrackOutcome::Confirmed(_)));
    assert_eq!(*state.borrow(), AttemptState::Confirmed);

    let confirmed = outcomes.confirmed.lock().unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].transaction_hash, handle_abc());
    assert!(outcomes.reverted.lock().unwrap().is_empty());
    assert!(harness.sink.attempts.lock().unwrap().is_empty());
    assert_eq!(
        *harness.log.lock().unwrap(),
        vec![Event::Probe, Event::Submit(SubmissionMode::Sponsored)]
    );
}

#[tokio::test]
async fn test_reverted_transaction_reports_through_callback() {
    let harness = harness(Eligibility::all(), Ok(handle_abc()), true);
    let (intent, outcomes) = transfer_intent();
    let submission = harness.orchestrator.send(&intent, 5, ctx()).await.unwrap();
    assert!(matches!(submission.outcome().await, TrackOutcome::Reverted(_)));
    assert!(outcomes.confirmed.lock().unwrap().is_empty());
    assert_eq!(outcomes.reverted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dropped_submission_fires_no_callback() {
    let harness = harness(Eligibility::all(), Ok(handle_abc()), false);
    let (intent, outcomes) = transfer_intent();
    let submission = harness.orchestrator.send(&intent, 5, ctx()).await.unwrap();
    let mut state = submission.state();
    drop(submission);
    state
        .wait_for(|s| *s == AttemptState::Cancelled)
        .await
        .unwrap();
    assert!(outcomes.confirmed.lock().unwrap().is_empty());
    assert!(outcomes.reverted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_detached_submission_still_reports_outcome() {
    let harness = harness(Eligibility::all(), Ok(handle_abc()), false);
    let (intent, outcomes) = transfer_intent();
    let submission = harness.orchestrator.send(&intent, 5, ctx()).await.unwrap();
    let tracking = submission.detach();
    assert!(matches!(tracking.outcome().await, TrackOutcome::Confirmed(_)));
    assert_eq!(outcomes.confirmed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_paymaster_unable_sends_standard_without_recovery() {
    let eligibility = Eligibility {
        paymaster_can_sponsor: false,
        ..Eligibility::all()
    };
    let harness = harness(eligibility, Ok(handle_abc()), false);
    let (intent, outcomes) = transfer_intent();
    let submission = harness.orchestrator.send(&intent, 5, ctx()).await.unwrap();
    assert_eq!(submission.mode, SubmissionMode::Standard);
    submission.outcome().await;
    assert_eq!(outcomes.confirmed.lock().unwrap().len(), 1);
    assert!(!harness.log.lock().unwrap().contains(&Event::Offer));
}

#[tokio::test]
async fn test_sponsor_unavailable_is_offered_for_recovery() {
    let harness = harness(
        Eligibility::all(),
        Err(SubmissionError::sponsor_unavailable("sponsor balance too low")),
        false,
    );
    let (intent, outcomes) = transfer_intent();
    let err = harness
        .orchestrator
        .send(&intent, 250, ctx())
        .await
        .unwrap_err();

    assert!(err.is_recoverable());
    assert_eq!(err.cause(), Some(SubmissionErrorCause::SponsorUnavailable));
    assert_eq!(
        *harness.log.lock().unwrap(),
        vec![
            Event::Probe,
            Event::Submit(SubmissionMode::Sponsored),
            Event::Refetch,
            Event::Offer,
        ]
    );
    assert_eq!(outcomes.builds.load(Ordering::SeqCst), 1);

    let attempt = harness.sink.attempts.lock().unwrap().pop().unwrap();
    assert_eq!(attempt.intent.action_id(), intent.action_id());
    assert_eq!(attempt.mutation_args, 250);
    assert_eq!(attempt.chain, ctx());
    assert_eq!(attempt.error.cause, SubmissionErrorCause::SponsorUnavailable);
    let rebuilt = attempt
        .intent
        .builder()
        .build(&attempt.mutation_args)
        .await
        .unwrap();
    assert_eq!(rebuilt.value, U256::from(250));

    // Nothing was submitted successfully, so no outcome callback may fire.
    tokio::task::yield_now().await;
    assert!(outcomes.confirmed.lock().unwrap().is_empty());
    assert!(outcomes.reverted.lock().unwrap().is_empty());

    // The snapshot carries the original callbacks.
    let submission = attempt
        .retry_as_standard(&harness.orchestrator)
        .await
        .unwrap();
    assert_eq!(submission.mode, SubmissionMode::Standard);
    submission.outcome().await;
    assert_eq!(outcomes.confirmed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_user_rejection_is_terminal() {
    let harness = harness(
        Eligibility::all(),
        Err(SubmissionError::user_rejected("User rejected the request.")),
        false,
    );
    let (intent, outcomes) = transfer_intent();
    let err = harness.orchestrator.send(&intent, 1, ctx()).await.unwrap_err();
    assert!(matches!(
        err,
        SendTransactionError::Submission {
            mode: SubmissionMode::Sponsored,
            ..
        }
    ));
    assert!(!err.is_recoverable());
    assert!(harness.sink.attempts.lock().unwrap().is_empty());
    assert!(!harness.log.lock().unwrap().contains(&Event::Refetch));
    assert!(outcomes.confirmed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_builder_failure_submits_nothing() {
    let harness = harness(Eligibility::all(), Ok(handle_abc()), false);
    let intent = TransactionIntent::new(
        |_: u64| async { Err::<TransactionData, BoxError>("insufficient allowance".into()) },
        |_| {},
        |_| {},
    );
    let err = harness.orchestrator.send(&intent, 1, ctx()).await.unwrap_err();
    assert!(matches!(err, SendTransactionError::Build(_)));
    assert!(harness.log.lock().unwrap().is_empty());
}
