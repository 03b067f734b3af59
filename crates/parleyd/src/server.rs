use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::RelayError;
use crate::registry::Registry;
use parley_common::InitDataVerifier;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the relay server.
pub struct ServerState {
    /// Connected participants and their outbound queues.
    pub registry: Registry,
    /// Init-data verifier holding the key derived from the bot token.
    pub verifier: InitDataVerifier,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Connections currently holding a slot, admitted or not.
    pub active_connections: AtomicUsize,
}

impl ServerState {
    /// Creates state with an empty registry.
    #[must_use]
    pub fn new(config: ServerConfig, verifier: InitDataVerifier) -> Self {
        Self {
            registry: Registry::new(),
            verifier,
            config,
            active_connections: AtomicUsize::new(0),
        }
    }
}

/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), RelayError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    run_with_shutdown(listener, state, shutdown_rx).await
}

/// Run the accept loop until `shutdown` changes or its sender is dropped.
///
/// On shutdown no new sockets are accepted and every connection is told to
/// close. In-flight connections get [`DRAIN_TIMEOUT`] to finish before they
/// are aborted.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), RelayError> {
    let local_addr = listener.local_addr()?;
    info!("server listening on {}", local_addr);
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&state);
                        let shutdown = shutdown.clone();
                        tasks.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, state, shutdown).await {
                                debug!("connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            _ = shutdown.changed() => {
                info!("shutdown signal received, draining {} connections", tasks.len());
                break;
            }
        }
    }

    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while !tasks.is_empty() {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(
                    "drain timeout reached with {} connections still active",
                    tasks.len()
                );
                tasks.abort_all();
                break;
            }
        }
    }

    info!("server shut down gracefully");
    Ok(())
}
