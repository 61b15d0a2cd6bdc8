//! Command-line entrypoint: send one transaction, sponsored when possible.
//!
//! ```text
//! gasless-tx --config config.json --chain eip155:324 --to 0x.. [--data 0x..] [--value wei] [--no-gasless] [--fallback]
//! ```
//!
//! Prints the transaction hash once submitted and exits when the transaction is
//! confirmed (status 0) or reverted (non-zero).
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` path to the configuration file
//! - `RUST_LOG` log filter
//! - `OTEL_*` variables enable trace and metric export

use alloy_primitives::{Address, Bytes, U256};
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;

use gasless_tx::chain::eip155::{Eip155Observer, Eip155Submitter};
use gasless_tx::chain::{ChainContext, ChainId, ChainRegistry, FromConfig};
use gasless_tx::config::Config;
use gasless_tx::dispatch::Dispatcher;
use gasless_tx::orchestrator::{GaslessOrchestrator, TransactionIntent};
use gasless_tx::paymaster::PaymasterClient;
use gasless_tx::recovery::RecoverySlot;
use gasless_tx::settings::{SendOptions, UserChainSettings};
use gasless_tx::sig_down::SigDown;
use gasless_tx::telemetry::Telemetry;
use gasless_tx::tracker::{OutcomeTracker, TrackOutcome};
use gasless_tx::transaction::{BoxError, TransactionData};

#[derive(Debug, Parser)]
#[command(name = "gasless-tx", version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
    /// Chain to send on, as `eip155:<id>` or a known network name.
    #[arg(long, value_parser = parse_chain)]
    chain: ChainId,
    #[arg(long)]
    to: Address,
    /// Hex-encoded call data.
    #[arg(long, default_value = "0x")]
    data: Bytes,
    /// Value in wei.
    #[arg(long, default_value = "0")]
    value: U256,
    /// Never try sponsorship.
    #[arg(long)]
    no_gasless: bool,
    /// Retry with standard fees if the paymaster refuses.
    #[arg(long)]
    fallback: bool,
}

fn parse_chain(value: &str) -> Result<ChainId, String> {
    value
        .parse::<ChainId>()
        .ok()
        .or_else(|| ChainId::from_network_name(value))
        .ok_or_else(|| format!("unknown chain {value}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let cli = Cli::parse();
    let config = Config::load_from_path(&cli.config)?;

    let chains = ChainRegistry::from_config(config.chains()).await?;
    let account = chains
        .by_chain_id(cli.chain)
        .map(|provider| provider.account())
        .ok_or_else(|| format!("chain {} is not configured", cli.chain))?;
    let ctx = ChainContext::new(cli.chain, account);

    let paymaster = config
        .paymaster()
        .map(PaymasterClient::try_from)
        .transpose()?;
    if paymaster.is_none() {
        tracing::info!("No paymaster configured, all transactions use standard fees");
    }

    let dispatcher = Dispatcher::new(
        UserChainSettings::new(config.user_settings().clone()),
        config.features().clone(),
        paymaster.clone(),
        Eip155Submitter::new(chains.clone(), paymaster),
    );
    let recovery = Arc::new(RecoverySlot::<TransactionData>::new());
    let sig_down = SigDown::try_new()?;
    let orchestrator = GaslessOrchestrator::new(
        dispatcher,
        OutcomeTracker::new(Eip155Observer::new(chains)),
        Arc::clone(&recovery),
    )
    .with_cancellation(sig_down.cancellation_token());

    let options = if cli.no_gasless {
        SendOptions::standard_only()
    } else {
        SendOptions::default()
    };
    let intent = TransactionIntent::new(
        |tx: TransactionData| async move { Ok::<_, BoxError>(tx) },
        |receipt| tracing::info!(hash = %receipt.transaction_hash, block = ?receipt.block_number, "Transaction confirmed"),
        |receipt| tracing::warn!(hash = %receipt.transaction_hash, block = ?receipt.block_number, "Transaction reverted"),
    )
    .with_options(options);
    let tx = TransactionData {
        to: cli.to,
        data: cli.data,
        value: cli.value,
    };

    let submission = match orchestrator.send(&intent, tx, ctx).await {
        Ok(submission) => submission,
        Err(err) if err.is_recoverable() && cli.fallback => {
            tracing::warn!(error = %err, "Sponsorship refused, retrying with standard fees");
            recovery
                .retry_as_standard(&orchestrator)
                .await
                .ok_or("no failed attempt to retry")??
        }
        Err(err) => return Err(err.into()),
    };
    println!("{}", submission.handle.hash);

    match submission.outcome().await {
        TrackOutcome::Confirmed(_) => Ok(()),
        TrackOutcome::Reverted(receipt) => {
            Err(format!("transaction {} reverted", receipt.transaction_hash).into())
        }
        TrackOutcome::Cancelled => {
            sig_down.recv().await;
            Err("interrupted before the transaction settled".into())
        }
        TrackOutcome::Failed(reason) => Err(reason.into()),
    }
}
