//! Courier Runtime: bootstrap for delivery pipelines
//!
//! Provides [`run()`] for zero-boilerplate startup, and [`RuntimeBuilder`]
//! for callers who need to override configuration, the metrics address, or
//! drive the producer path from a task of their own.
//!
//! # Quick start
//!
//! ```ignore
//! use courier_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broker = MemoryBroker::new(3);
//!     courier_runtime::run(move |pipeline| async move {
//!         Ok(pipeline
//!             .publisher(broker.clone())
//!             .processor(LedgerWriter::default())
//!             .committer(Arc::new(MemoryOffsetStore::new()))
//!             .source("banking.transactions", 0, broker.source("banking.transactions", 0, 0)))
//!     }).await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod prelude;

use courier_pipeline::config::{Config, LogFormat};
use courier_pipeline::delivery::DeliveryCoordinator;
use courier_pipeline::metrics::Metrics;
use courier_pipeline::metrics_server::MetricsServer;
use courier_pipeline::pipeline::Pipeline;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type ProducerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type ProducerTask =
    Box<dyn FnOnce(Arc<DeliveryCoordinator>, watch::Receiver<bool>) -> ProducerFuture + Send>;

/// Run a Courier pipeline with default settings.
///
/// Loads configuration from `COURIER_*` environment variables, initialises
/// tracing and metrics, calls your closure to wire up the pipeline, then
/// runs the partition workers until SIGINT/SIGTERM.
pub async fn run<F, Fut>(configure: F) -> anyhow::Result<()>
where
    F: FnOnce(Pipeline) -> Fut,
    Fut: Future<Output = anyhow::Result<Pipeline>>,
{
    RuntimeBuilder::new().configure(configure).await
}

/// Power-user builder for controlling runtime behaviour.
///
/// # Example
///
/// ```ignore
/// RuntimeBuilder::new()
///     .metrics_addr("127.0.0.1:9091".parse()?)
///     .producer(|delivery, mut shutdown| async move {
///         while !*shutdown.borrow() {
///             let outcome = delivery.send(Message::new("CUST-1", payload.clone())).await;
///             info!(produced = outcome.is_produced(), "sent");
///             tokio::select! {
///                 _ = shutdown.changed() => {}
///                 _ = tokio::time::sleep(Duration::from_secs(1)) => {}
///             }
///         }
///         Ok(())
///     })
///     .configure(|pipeline| async move { Ok(pipeline.publisher(broker)) })
///     .await
/// ```
pub struct RuntimeBuilder {
    config: Option<Config>,
    metrics_addr: Option<SocketAddr>,
    metrics_enabled: bool,
    producer: Option<ProducerTask>,
}

impl RuntimeBuilder {
    /// Create a new builder; configuration comes from the environment.
    pub fn new() -> Self {
        Self {
            config: None,
            metrics_addr: None,
            metrics_enabled: true,
            producer: None,
        }
    }

    /// Use this configuration instead of reading the environment.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the metrics HTTP server address.
    ///
    /// Default: `COURIER_METRICS_ADDR`, or `0.0.0.0:9090`.
    pub fn metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = Some(addr);
        self
    }

    /// Do not start the metrics HTTP server.
    ///
    /// Prometheus counters are still recorded.
    pub fn disable_metrics_server(mut self) -> Self {
        self.metrics_enabled = false;
        self
    }

    /// Drive the producer path from a spawned task.
    ///
    /// The task receives the delivery coordinator once the pipeline is
    /// built, plus a shutdown receiver that flips to `true` on SIGINT or
    /// SIGTERM. Shutdown waits for the task to return, so a send already in
    /// flight (including one sleeping in retry backoff) still reaches its
    /// outcome. The task must stop starting new sends once signalled.
    pub fn producer<F, Fut>(mut self, task: F) -> Self
    where
        F: FnOnce(Arc<DeliveryCoordinator>, watch::Receiver<bool>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task: ProducerTask = Box::new(move |delivery, shutdown| -> ProducerFuture {
            Box::pin(task(delivery, shutdown))
        });
        self.producer = Some(task);
        self
    }

    /// Configure the pipeline and run it to completion.
    ///
    /// This is the terminal method. It returns after shutdown, with an
    /// error when any partition worker stopped on an unaccounted-for record.
    pub async fn configure<F, Fut>(self, configure: F) -> anyhow::Result<()>
    where
        F: FnOnce(Pipeline) -> Fut,
        Fut: Future<Output = anyhow::Result<Pipeline>>,
    {
        self.run_until(configure, shutdown_signal()).await
    }

    async fn run_until<F, Fut, S>(self, configure: F, shutdown: S) -> anyhow::Result<()>
    where
        F: FnOnce(Pipeline) -> Fut,
        Fut: Future<Output = anyhow::Result<Pipeline>>,
        S: Future<Output = ()>,
    {
        // ── 1. Load config ───────────────────────────────────────
        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => Config::from_env()?,
        };

        // ── 2. Init tracing ──────────────────────────────────────
        init_tracing(&config);

        let metrics_addr = self.metrics_addr.unwrap_or(config.metrics_addr);
        info!(
            topic = %config.topic,
            dlq_topic = %config.dlq_topic,
            max_attempts = config.max_attempts,
            circuit_threshold = config.circuit_threshold,
            metrics_addr = %metrics_addr,
            "Starting Courier"
        );

        // ── 3. Init metrics ──────────────────────────────────────
        Metrics::init()?;

        // ── 4. User configures the Pipeline ──────────────────────
        let pipeline = configure(Pipeline::from_config(&config)).await?;
        let mut runner = pipeline.build()?;

        // ── 5. Metrics HTTP server ───────────────────────────────
        let metrics_handle = self
            .metrics_enabled
            .then(|| MetricsServer::start(metrics_addr, runner.probes()));

        // ── 6. Spawn partition workers and producer task ─────────
        runner.start();
        info!(workers = runner.running_workers(), "Pipeline running");

        let (producer_tx, producer_rx) = watch::channel(false);
        let producer_handle = self.producer.map(|task| {
            let delivery = Arc::clone(runner.delivery());
            tokio::spawn(async move {
                if let Err(e) = task(delivery, producer_rx).await {
                    error!(error = %e, "Producer task failed");
                }
            })
        });

        shutdown.await;

        // ── 7. Shutdown ──────────────────────────────────────────
        let _ = producer_tx.send(true);
        if let Some(handle) = producer_handle {
            info!("Waiting for in-flight deliveries");
            if let Err(e) = handle.await {
                error!(error = %e, "Producer task panicked");
            }
        }
        let report = runner.shutdown().await;
        if let Some(handle) = metrics_handle {
            handle.abort();
        }

        info!(
            handled = report.handled(),
            workers = report.summaries.len() + report.errors.len(),
            "Courier shutdown complete"
        );

        if !report.errors.is_empty() {
            anyhow::bail!(
                "{} partition worker(s) stopped with unaccounted-for records: {}",
                report.errors.len(),
                report.errors[0]
            );
        }
        Ok(())
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter directive: `RUST_LOG` when set, else the configured level.
fn env_filter(config: &Config) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level))
}

/// Initialise the tracing subscriber based on config.
fn init_tracing(config: &Config) {
    let registry = tracing_subscriber::registry().with(env_filter(config));

    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if let Err(e) = result {
        warn!(error = %e, "Tracing subscriber already installed");
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use courier_pipeline::{BrokerError, DeliveryOutcome, MemoryBroker, Message};
    use std::time::Duration;

    #[test]
    fn test_builder_defaults() {
        let builder = RuntimeBuilder::new();
        assert!(builder.config.is_none());
        assert!(builder.metrics_addr.is_none());
        assert!(builder.metrics_enabled);
        assert!(builder.producer.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let builder = RuntimeBuilder::new()
            .config(Config::default())
            .metrics_addr("127.0.0.1:9191".parse().unwrap())
            .disable_metrics_server()
            .producer(|_, _| async { Ok(()) });

        assert_eq!(builder.metrics_addr, Some("127.0.0.1:9191".parse().unwrap()));
        assert!(!builder.metrics_enabled);
        assert!(builder.producer.is_some());
    }

    #[test]
    fn test_env_filter_falls_back_to_config_level() {
        let config = Config {
            log_level: "courier_pipeline=debug".to_string(),
            ..Config::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(env_filter(&config).to_string(), "courier_pipeline=debug");
        }
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_startup() {
        let config = Config {
            max_attempts: 0,
            ..Config::default()
        };
        let result = RuntimeBuilder::new()
            .config(config)
            .disable_metrics_server()
            .configure(|pipeline| async move { Ok(pipeline) })
            .await;
        assert!(result.unwrap_err().to_string().contains("max_attempts"));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_delivery_in_backoff() {
        tokio::time::pause();
        let config = Config::default();
        let topic = config.topic.clone();
        let broker = MemoryBroker::new(1);
        broker.inject_failures(&topic, [BrokerError::Timeout("no ack".to_string())]);

        let (outcome_tx, outcome_rx) = tokio::sync::oneshot::channel();
        let (shutdown_seen_tx, shutdown_seen_rx) = tokio::sync::oneshot::channel();
        let publisher = broker.clone();

        RuntimeBuilder::new()
            .config(config)
            .disable_metrics_server()
            .producer(move |delivery, shutdown| async move {
                let outcome = delivery
                    .send(Message::new("CUST-1", Bytes::from_static(b"{}")))
                    .await;
                let _ = shutdown_seen_tx.send(*shutdown.borrow());
                let _ = outcome_tx.send((outcome, delivery.metrics()));
                Ok(())
            })
            // First attempt fails at t=0, the retry sleeps until t=1000ms
            .run_until(
                move |pipeline| async move { Ok(pipeline.publisher(publisher)) },
                tokio::time::sleep(Duration::from_millis(10)),
            )
            .await
            .unwrap();

        assert!(shutdown_seen_rx.await.unwrap());
        let (outcome, metrics) = outcome_rx.await.unwrap();
        assert!(
            matches!(outcome, DeliveryOutcome::Produced { attempts: 2, .. }),
            "{outcome:?}"
        );
        assert_eq!(metrics.produced, 1);
        assert_eq!(metrics.retried, 1);
        assert_eq!(broker.topic_records(&topic).len(), 1);
        assert!(broker.is_closed());
    }
}
