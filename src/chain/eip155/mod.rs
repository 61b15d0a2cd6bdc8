//! EVM collaborators backed by alloy.
//!
//! - [`Eip155ChainProvider`] - per-chain RPC provider and submitting account
//! - [`Eip155Submitter`] - [`Submitter`](crate::transaction::Submitter) for standard and sponsored paths
//! - [`Eip155Observer`] - [`ChainObserver`](crate::transaction::ChainObserver) waiting for receipts
//! - [`AccountNonces`] - nonce manager seeded from the pending block

mod nonce;
mod provider;
mod submitter;

pub use nonce::*;
pub use provider::*;
pub use submitter::*;
