//! Nibiru staking reward compounder
//!
//! Claims staking rewards from a compounder contract and restakes them across
//! a weighted validator set, raising fee or gas when the chain rejects a
//! transaction for either.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod chain;
mod compounder;
mod config;
mod error;
mod keys;
mod metrics;
mod schedule;
mod tx;

use chain::ChainProvider;
use compounder::Compounder;
use config::Settings;
use error::CompounderResult;
use keys::Keyring;
use metrics::MetricsServer;
use schedule::Scheduler;
use tx::{TransactionSender, TxBuilder};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting compounder v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for chain {} via {}",
        settings.chain.chain_id, settings.chain.grpc_endpoint
    );

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let compounder = match build_compounder(&settings).await {
        Ok(compounder) => compounder,
        Err(e) => {
            if e.is_setup_failure() {
                error!("Setup failed: {}", e);
            }
            return Err(e.into());
        }
    };
    let scheduler = Scheduler::from_config(&settings.compounder);

    tokio::select! {
        report = scheduler.run(&compounder) => {
            if !report.is_success() {
                warn!("Last cycle did not complete cleanly");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Compounder stopped");
    Ok(())
}

/// Connect to the node and load the signer
async fn build_compounder(settings: &Settings) -> CompounderResult<Compounder<ChainProvider>> {
    let channel = chain::connect(&settings.chain).await?;
    let provider = Arc::new(ChainProvider::new(channel));
    info!("Connected to {}", settings.chain.grpc_endpoint);

    let keyring = Keyring::new(settings.chain.account_prefix.clone());
    let signer = keyring.get_or_create(&settings.signer.name, Some(&settings.signer.mnemonic))?;
    info!("Signer address: {}", signer.address());

    let builder = TxBuilder::new(&settings.chain.chain_id, &settings.chain.denom)?;
    let sender = TransactionSender::from_config(provider, builder, &settings.tx);
    Compounder::new(settings, sender, signer)
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,compounder=debug,h2=warn,tower=warn,hyper=warn")
    });

    let json = std::env::var("COMPOUNDER_LOG_JSON")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
