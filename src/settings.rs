//! Eligibility for sponsored submission.
//!
//! Whether a transaction is sent sponsored depends on three independent inputs:
//! the user's per-chain opt-in ([`UserChainSettings`]), the `gaslessTransactions`
//! feature flag ([`FeatureFlags`]), and whether the paymaster currently sponsors
//! the chain. [`resolve_eligibility`] and [`select_mode`] are pure functions over
//! those inputs; the stores below only hold the live values they are read from.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::chain::ChainId;

/// Name of the feature flag gating sponsored submission.
pub const GASLESS_TRANSACTIONS_FEATURE: &str = "gaslessTransactions";

/// Fee path of a single submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionMode {
    Sponsored,
    Standard,
}

impl SubmissionMode {
    pub fn is_sponsored(&self) -> bool {
        matches!(self, SubmissionMode::Sponsored)
    }
}

impl std::fmt::Display for SubmissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionMode::Sponsored => f.write_str("sponsored"),
            SubmissionMode::Standard => f.write_str("standard"),
        }
    }
}

/// Inputs to the eligibility decision, read fresh for every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EligibilityInputs {
    pub user_opt_in: bool,
    pub feature_enabled: bool,
    pub paymaster_can_sponsor: bool,
}

/// Sponsored submission is possible only if all three inputs hold.
pub fn resolve_eligibility(inputs: EligibilityInputs) -> bool {
    inputs.user_opt_in && inputs.feature_enabled && inputs.paymaster_can_sponsor
}

/// Per-call options supplied with a transaction intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    /// `false` forces standard mode regardless of eligibility.
    pub try_gasless: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self { try_gasless: true }
    }
}

impl SendOptions {
    pub fn standard_only() -> Self {
        Self { try_gasless: false }
    }
}

/// Picks the fee path. An explicit opt-out always wins.
pub fn select_mode(options: SendOptions, inputs: EligibilityInputs) -> SubmissionMode {
    if options.try_gasless && resolve_eligibility(inputs) {
        SubmissionMode::Sponsored
    } else {
        SubmissionMode::Standard
    }
}

/// User preferences for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSettings {
    #[serde(default = "chain_settings::default_gasless_transactions")]
    pub gasless_transactions: bool,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            gasless_transactions: chain_settings::default_gasless_transactions(),
        }
    }
}

mod chain_settings {
    pub fn default_gasless_transactions() -> bool {
        true
    }
}

/// Shared, runtime-updatable user settings keyed by chain.
///
/// Chains without an explicit entry use [`ChainSettings::default`].
#[derive(Debug, Clone, Default)]
pub struct UserChainSettings {
    inner: Arc<RwLock<HashMap<ChainId, ChainSettings>>>,
}

impl UserChainSettings {
    pub fn new(settings: HashMap<ChainId, ChainSettings>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn get(&self, chain_id: ChainId) -> ChainSettings {
        let settings = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        settings.get(&chain_id).copied().unwrap_or_default()
    }

    pub fn set(&self, chain_id: ChainId, settings: ChainSettings) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chain_id, settings);
    }

    pub fn set_gasless_transactions(&self, chain_id: ChainId, enabled: bool) {
        self.set(
            chain_id,
            ChainSettings {
                gasless_transactions: enabled,
            },
        );
        tracing::debug!(chain = %chain_id, enabled, "Updated gasless transactions setting");
    }

    pub fn gasless_transactions(&self, chain_id: ChainId) -> bool {
        self.get(chain_id).gasless_transactions
    }
}

/// Named feature flags, each enabled on a set of chains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags(HashMap<String, HashSet<ChainId>>);

impl FeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable<I>(mut self, name: impl Into<String>, chains: I) -> Self
    where
        I: IntoIterator<Item = ChainId>,
    {
        self.0.entry(name.into()).or_default().extend(chains);
        self
    }

    pub fn is_enabled(&self, name: &str, chain_id: ChainId) -> bool {
        self.0
            .get(name)
            .is_some_and(|chains| chains.contains(&chain_id))
    }

    pub fn gasless_transactions(&self, chain_id: ChainId) -> bool {
        self.is_enabled(GASLESS_TRANSACTIONS_FEATURE, chain_id)
    }
}
