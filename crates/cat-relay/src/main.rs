//! Relay server binary

use std::sync::Arc;

use anyhow::{bail, Context};
use cat_relay::config::{Args, RelaySettings};
use cat_relay::{bind, serve, AppState, FileAccounts, RelayHandle};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cat_relay=info,cat_codec=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let settings = RelaySettings::load(args.config.as_deref()).merge(&args);

    let Some(accounts_path) = settings.accounts.clone() else {
        bail!("no account file configured, pass --accounts");
    };
    let accounts = FileAccounts::load(&accounts_path)
        .with_context(|| format!("loading accounts from {}", accounts_path.display()))?;
    tracing::info!(
        "Loaded {} accounts from {}",
        accounts.len(),
        accounts_path.display()
    );

    let listener = bind(settings.listen_addr()).await.context("binding listener")?;
    let state = AppState {
        relay: RelayHandle::spawn(),
        accounts: Arc::new(accounts),
        config: settings.server_config(),
    };

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                signal.cancel();
            }
            Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    let relay = state.relay.clone();
    serve(listener, state, shutdown).await.context("serving")?;
    let _ = relay.shutdown().await;
    Ok(())
}
