//! HTTP server for Prometheus metrics and pipeline introspection
//!
//! Runs a lightweight HTTP server on a separate port for Prometheus scraping.
//!
//! # Endpoints
//!
//! - `GET /metrics` - Prometheus metrics
//! - `GET /health` - Health summary (JSON)
//! - `GET /pipeline` - Producer and consumer snapshots (JSON)
//!
//! # Example
//!
//! ```ignore
//! use courier_pipeline::metrics_server::{MetricsServer, Probes};
//!
//! let probes = Probes::new().with_delivery(coordinator.clone());
//! let metrics_handle = MetricsServer::start(config.metrics_addr, probes);
//! ```

use crate::consumer::{AckCoordinator, ConsumerMetrics};
use crate::delivery::{DeliveryCoordinator, ProducerMetrics};
use crate::resilience::CircuitState;
use axum::extract::State;
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Coordinators the server reports on
#[derive(Clone, Default)]
pub struct Probes {
    delivery: Option<Arc<DeliveryCoordinator>>,
    consumer: Option<Arc<AckCoordinator>>,
}

impl Probes {
    /// No coordinators; `/health` reports "ok"
    pub fn new() -> Self {
        Self::default()
    }

    /// Report on the producer path
    pub fn with_delivery(mut self, delivery: Arc<DeliveryCoordinator>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Report on the consumer path
    pub fn with_consumer(mut self, consumer: Arc<AckCoordinator>) -> Self {
        self.consumer = Some(consumer);
        self
    }
}

/// Metrics HTTP server
pub struct MetricsServer;

impl MetricsServer {
    /// Start the metrics server on the given address
    ///
    /// Returns a JoinHandle that can be used to abort the server.
    /// The server runs until aborted or the process exits.
    pub fn start(addr: SocketAddr, probes: Probes) -> JoinHandle<()> {
        tokio::spawn(async move {
            let app = router(probes);

            info!(addr = %addr, "Metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, addr = %addr, "Failed to bind metrics server");
                    return;
                }
            };

            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }
}

fn router(probes: Probes) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/pipeline", get(pipeline_handler))
        .with_state(probes)
}

/// Handler for /metrics endpoint
async fn metrics_handler() -> impl IntoResponse {
    let body = crate::metrics::gather();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Structured health summary
#[derive(serde::Serialize)]
struct HealthSummary {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    circuit_state: Option<CircuitState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dead_letter_forwarding_failures: Option<u64>,
}

/// Handler for /health endpoint
///
/// "degraded" while the circuit breaker is open (deliveries are being
/// dead-lettered) or after any dead-letter forward has failed.
async fn health_handler(State(probes): State<Probes>) -> impl IntoResponse {
    let Some(delivery) = probes.delivery.as_ref() else {
        return (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response();
    };

    let circuit_state = delivery.breaker().state();
    let forwarding_failures = delivery.forwarder().failed_count();
    let status = if circuit_state == CircuitState::Open || forwarding_failures > 0 {
        "degraded"
    } else {
        "healthy"
    };

    let summary = HealthSummary {
        status,
        circuit_state: Some(circuit_state),
        dead_letter_forwarding_failures: Some(forwarding_failures),
    };
    (StatusCode::OK, Json(summary)).into_response()
}

#[derive(serde::Serialize)]
struct PipelineSnapshot {
    producer: Option<ProducerMetrics>,
    consumer: Option<ConsumerMetrics>,
}

/// Handler for /pipeline endpoint
async fn pipeline_handler(State(probes): State<Probes>) -> impl IntoResponse {
    if probes.delivery.is_none() && probes.consumer.is_none() {
        return (StatusCode::SERVICE_UNAVAILABLE, "No pipeline registered").into_response();
    }

    let snapshot = PipelineSnapshot {
        producer: probes.delivery.as_ref().map(|d| d.metrics()),
        consumer: probes.consumer.as_ref().map(|c| c.metrics()),
    };
    (StatusCode::OK, Json(snapshot)).into_response()
}
