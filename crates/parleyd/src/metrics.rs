use crate::server::ServerState;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    participants: usize,
    verifier_configured: bool,
}

/// # Errors
///
/// Returns an error if installing the recorder or binding the HTTP server fails.
pub async fn start_metrics_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Returns 200 while running, with the current roster size.
async fn health_handler(State(state): State<Arc<ServerState>>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            participants: state.registry.len(),
            verifier_configured: state.verifier.is_configured(),
        }),
    )
}

/// Connection count gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("parley_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("parley_connections_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record an admission attempt with the given status label.
    pub fn admissions_total(status: &'static str) {
        metrics::counter!("parley_admissions_total", "status" => status).increment(1);
    }

    /// Count a signaling message handed to the router, by kind.
    pub fn messages_routed_total(kind: &'static str) {
        metrics::counter!("parley_messages_routed_total", "kind" => kind).increment(1);
    }

    /// Count an inbound or outbound message that was dropped.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("parley_messages_dropped_total", "reason" => reason).increment(1);
    }

    /// Count a full roster broadcast.
    pub fn roster_broadcasts_total() {
        metrics::counter!("parley_roster_broadcasts_total").increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record the time spent routing one message, in seconds.
    pub fn route_latency_seconds(value: f64) {
        metrics::histogram!("parley_route_latency_seconds").record(value);
    }
}
