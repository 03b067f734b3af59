#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use parley_common::InitDataVerifier;
use parleyd::config::{Args, ServerConfig};
use parleyd::metrics::start_metrics_server;
use parleyd::run_with_shutdown;
use parleyd::server::ServerState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let verifier = InitDataVerifier::new(args.bot_token.as_deref());
    let config: ServerConfig = args.into();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    if !verifier.is_configured() {
        warn!("BOT_TOKEN is not set, every connection will be refused");
    }
    match &config.web_app_url {
        Some(url) => info!("serving mini app at {}", url),
        None => warn!("WEB_APP_URL is not set"),
    }

    let state = Arc::new(ServerState::new(config.clone(), verifier));

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            if let Err(e) = start_metrics_server(config.metrics_addr, state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let mut server = tokio::spawn(run_with_shutdown(listener, state, shutdown_rx));

    let finished = tokio::select! {
        result = &mut server => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            None
        }
    };

    // stop accepting and let open connections close cleanly
    let result = match finished {
        Some(result) => result,
        None => {
            let _ = shutdown_tx.send(());
            server.await
        }
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("server error: {}", e),
        Err(e) => error!("server task failed: {}", e),
    }

    Ok(())
}
