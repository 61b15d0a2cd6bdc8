//! Transaction dispatcher: build once, pick a fee path, submit.
//!
//! ```text
//! builder.build(args) ──► select_mode(options, eligibility) ──► submit_sponsored | submit_standard
//! ```
//!
//! The builder runs exactly once per attempt regardless of the mode. Mode
//! selection never fails: an unreachable paymaster counts as "cannot sponsor"
//! and the attempt silently goes standard. Once submitted, the mode is never
//! switched; a failed sponsored submission is returned as such.

use std::fmt::Display;

use crate::chain::ChainContext;
use crate::paymaster::CapabilityProbe;
use crate::settings::{
    EligibilityInputs, FeatureFlags, SendOptions, SubmissionMode, UserChainSettings, select_mode,
};
use crate::transaction::{
    BoxError, SubmissionError, Submitter, TransactionBuilder, TransactionData, TransactionHandle,
};

/// Lifecycle of a single submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    BuildingPayload,
    ModeSelected(SubmissionMode),
    Submitting(SubmissionMode),
    Tracking(SubmissionMode),
    Confirmed,
    Reverted,
    /// Sponsored submission refused; handed to the recovery surface.
    FailedRecoverable,
    FailedTerminal,
    /// Torn down before the outcome was reported.
    Cancelled,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Confirmed
                | AttemptState::Reverted
                | AttemptState::FailedRecoverable
                | AttemptState::FailedTerminal
                | AttemptState::Cancelled
        )
    }
}

impl Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptState::Idle => f.write_str("idle"),
            AttemptState::BuildingPayload => f.write_str("building_payload"),
            AttemptState::ModeSelected(mode) => write!(f, "mode_selected({mode})"),
            AttemptState::Submitting(mode) => write!(f, "submitting({mode})"),
            AttemptState::Tracking(mode) => write!(f, "tracking({mode})"),
            AttemptState::Confirmed => f.write_str("confirmed"),
            AttemptState::Reverted => f.write_str("reverted"),
            AttemptState::FailedRecoverable => f.write_str("failed_recoverable"),
            AttemptState::FailedTerminal => f.write_str("failed_terminal"),
            AttemptState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub handle: TransactionHandle,
    pub mode: SubmissionMode,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The caller's builder failed; nothing was submitted.
    #[error("Failed to build transaction: {0}")]
    Build(#[source] BoxError),
    #[error("{mode} submission failed: {error}")]
    Submission {
        mode: SubmissionMode,
        #[source]
        error: SubmissionError,
    },
}

/// Builds, selects the fee path for, and submits transactions.
#[derive(Debug, Clone)]
pub struct Dispatcher<P, S> {
    user_settings: UserChainSettings,
    features: FeatureFlags,
    probe: P,
    submitter: S,
}

impl<P, S> Dispatcher<P, S>
where
    P: CapabilityProbe + Sync,
    S: Submitter + Sync,
{
    pub fn new(user_settings: UserChainSettings, features: FeatureFlags, probe: P, submitter: S) -> Self {
        Self {
            user_settings,
            features,
            probe,
            submitter,
        }
    }

    pub fn user_settings(&self) -> &UserChainSettings {
        &self.user_settings
    }

    pub fn features(&self) -> &FeatureFlags {
        &self.features
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Reads the live eligibility inputs for `ctx`.
    ///
    /// The paymaster is only asked when the user and the feature flag allow
    /// sponsorship; otherwise `paymaster_can_sponsor` is reported as `false`.
    pub async fn eligibility(&self, ctx: &ChainContext) -> EligibilityInputs {
        let user_opt_in = self.user_settings.gasless_transactions(ctx.chain_id);
        let feature_enabled = self.features.gasless_transactions(ctx.chain_id);
        let paymaster_can_sponsor = if user_opt_in && feature_enabled {
            match self.probe.can_sponsor(ctx.chain_id).await {
                Ok(can_sponsor) => can_sponsor,
                Err(err) => {
                    tracing::warn!(chain = %ctx.chain_id, error = %err, "Paymaster probe failed, treating as unable to sponsor");
                    false
                }
            }
        } else {
            false
        };
        EligibilityInputs {
            user_opt_in,
            feature_enabled,
            paymaster_can_sponsor,
        }
    }

    /// Chooses the fee path for one attempt. Explicit opt-out skips the probe.
    pub async fn select_mode(&self, options: SendOptions, ctx: &ChainContext) -> SubmissionMode {
        if !options.try_gasless {
            return SubmissionMode::Standard;
        }
        let inputs = self.eligibility(ctx).await;
        let mode = select_mode(options, inputs);
        tracing::debug!(chain = %ctx.chain_id, ?inputs, %mode, "Selected submission mode");
        mode
    }

    /// Submits prepared data through the path for `mode`.
    pub async fn submit(
        &self,
        tx: &TransactionData,
        mode: SubmissionMode,
        ctx: &ChainContext,
    ) -> Result<TransactionHandle, SubmissionError> {
        match mode {
            SubmissionMode::Sponsored => self.submitter.submit_sponsored(tx, ctx).await,
            SubmissionMode::Standard => self.submitter.submit_standard(tx, ctx).await,
        }
    }

    /// Runs one full attempt: build, select, submit.
    pub async fn dispatch<A: Sync>(
        &self,
        builder: &dyn TransactionBuilder<A>,
        args: &A,
        options: SendOptions,
        ctx: &ChainContext,
    ) -> Result<Dispatched, DispatchError> {
        self.dispatch_with_progress(builder, args, options, ctx, |_| {})
            .await
    }

    /// Like [`Dispatcher::dispatch`], reporting each state it enters to `progress`.
    pub async fn dispatch_with_progress<A: Sync>(
        &self,
        builder: &dyn TransactionBuilder<A>,
        args: &A,
        options: SendOptions,
        ctx: &ChainContext,
        mut progress: impl FnMut(AttemptState) + Send,
    ) -> Result<Dispatched, DispatchError> {
        progress(AttemptState::BuildingPayload);
        let tx = builder.build(args).await.map_err(DispatchError::Build)?;

        let mode = self.select_mode(options, ctx).await;
        progress(AttemptState::ModeSelected(mode));

        progress(AttemptState::Submitting(mode));
        let handle = self
            .submit(&tx, mode, ctx)
            .await
            .map_err(|error| DispatchError::Submission { mode, error })?;
        tracing::info!(%handle, %mode, "Transaction submitted");
        Ok(Dispatched { handle, mode })
    }
}
