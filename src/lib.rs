//! Gas-sponsored EVM transaction submission.
//!
//! An application hands a [`TransactionIntent`](orchestrator::TransactionIntent) to the
//! [`GaslessOrchestrator`](orchestrator::GaslessOrchestrator). The orchestrator builds the
//! transaction, decides whether a paymaster covers its fee, submits it, and reports
//! the on-chain outcome through the intent's callbacks. When the paymaster refuses a
//! sponsored submission, the attempt is handed to a
//! [`RecoverySink`](recovery::RecoverySink) so it can be retried with the account
//! paying the fee.
//!
//! # Sponsorship
//!
//! A transaction is sent sponsored only if all of these hold at the time of sending:
//!
//! - the user has not opted out on the chain ([`settings::UserChainSettings`])
//! - the `gaslessTransactions` feature flag is enabled on the chain ([`settings::FeatureFlags`])
//! - the paymaster reports it can sponsor the chain ([`paymaster::CapabilityProbe`])
//!
//! Otherwise it is sent with standard fees, without an error. A per-call
//! [`SendOptions`](settings::SendOptions) with `try_gasless: false` forces standard fees.
//!
//! # Modules
//!
//! - [`settings`] - eligibility inputs and mode selection
//! - [`paymaster`] - capability probe and HTTP relay client
//! - [`dispatch`] - build, select, submit
//! - [`tracker`] - outcome tracking and callbacks
//! - [`recovery`] - retrying refused sponsored attempts
//! - [`orchestrator`] - the end-to-end flow
//! - [`chain`] - chain ids, the chain registry, and the alloy-backed collaborators
//! - [`config`] - JSON configuration with environment variable references
//! - [`telemetry`], [`sig_down`] - logging setup and shutdown signal handling for the binary

pub mod chain;
pub mod config;
pub mod dispatch;
pub mod orchestrator;
pub mod paymaster;
pub mod recovery;
pub mod settings;
pub mod sig_down;
pub mod telemetry;
pub mod tracker;
pub mod transaction;
