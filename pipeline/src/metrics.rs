//! Prometheus metrics for Courier
//!
//! The per-coordinator snapshots ([`ProducerMetrics`](crate::delivery::ProducerMetrics),
//! [`ConsumerMetrics`](crate::consumer::ConsumerMetrics)) are always
//! available. The process-global registry here is opt-in: nothing is
//! recorded until [`Metrics::init`] has been called.

use crate::error::{PipelineError, Result};
use crate::resilience::CircuitState;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder, register_counter_vec,
    register_gauge_vec, register_histogram_vec,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All Courier metrics
pub struct Metrics {
    // ─────────────────────────────────────────────────────────────────────────
    // Producer path
    // ─────────────────────────────────────────────────────────────────────────
    /// Messages acknowledged by the broker (by topic)
    pub messages_produced: CounterVec,

    /// Retries scheduled after a transient failure (by topic)
    pub delivery_retries: CounterVec,

    /// Failed publish attempts (by topic, error kind)
    pub delivery_errors: CounterVec,

    /// Attempts needed per successful delivery (by topic)
    pub delivery_attempts: HistogramVec,

    /// Circuit breaker state per channel (0=closed, 1=open, 2=half-open)
    pub circuit_breaker_state: GaugeVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Dead-letter path (both sides)
    // ─────────────────────────────────────────────────────────────────────────
    /// Messages forwarded to the dead-letter topic (by original topic, reason)
    pub dead_lettered: CounterVec,

    /// Dead-letter forwards that themselves failed (by original topic)
    pub forwarding_failures: CounterVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Consumer path
    // ─────────────────────────────────────────────────────────────────────────
    /// Records pulled from the broker (by topic)
    pub records_consumed: CounterVec,

    /// Records processed successfully (by topic)
    pub records_processed: CounterVec,

    /// Redelivered records skipped by the dedup ledger (by topic)
    pub duplicates_skipped: CounterVec,

    /// Failed processing attempts and poll errors (by topic)
    pub processing_errors: CounterVec,

    /// Offsets committed (by topic)
    pub offset_commits: CounterVec,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            // ─────────────────────────────────────────────────────────────────
            // Producer path
            // ─────────────────────────────────────────────────────────────────
            messages_produced: register_counter_vec!(
                "courier_messages_produced_total",
                "Total messages acknowledged by the broker",
                &["topic"]
            )
            .map_err(|e| PipelineError::Metrics(format!("messages_produced: {e}")))?,

            delivery_retries: register_counter_vec!(
                "courier_delivery_retries_total",
                "Total retries scheduled after transient failures",
                &["topic"]
            )
            .map_err(|e| PipelineError::Metrics(format!("delivery_retries: {e}")))?,

            delivery_errors: register_counter_vec!(
                "courier_delivery_errors_total",
                "Total failed publish attempts by error kind",
                &["topic", "kind"]
            )
            .map_err(|e| PipelineError::Metrics(format!("delivery_errors: {e}")))?,

            delivery_attempts: register_histogram_vec!(
                "courier_delivery_attempts",
                "Publish attempts needed per successful delivery",
                &["topic"],
                vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 10.0]
            )
            .map_err(|e| PipelineError::Metrics(format!("delivery_attempts: {e}")))?,

            circuit_breaker_state: register_gauge_vec!(
                "courier_circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
                &["channel"]
            )
            .map_err(|e| PipelineError::Metrics(format!("circuit_breaker_state: {e}")))?,

            // ─────────────────────────────────────────────────────────────────
            // Dead-letter path
            // ─────────────────────────────────────────────────────────────────
            dead_lettered: register_counter_vec!(
                "courier_dead_lettered_total",
                "Total messages forwarded to the dead-letter topic",
                &["topic", "reason"]
            )
            .map_err(|e| PipelineError::Metrics(format!("dead_lettered: {e}")))?,

            forwarding_failures: register_counter_vec!(
                "courier_dead_letter_forwarding_failures_total",
                "Total dead-letter forwards that failed",
                &["topic"]
            )
            .map_err(|e| PipelineError::Metrics(format!("forwarding_failures: {e}")))?,

            // ─────────────────────────────────────────────────────────────────
            // Consumer path
            // ─────────────────────────────────────────────────────────────────
            records_consumed: register_counter_vec!(
                "courier_records_consumed_total",
                "Total records pulled from the broker",
                &["topic"]
            )
            .map_err(|e| PipelineError::Metrics(format!("records_consumed: {e}")))?,

            records_processed: register_counter_vec!(
                "courier_records_processed_total",
                "Total records processed successfully",
                &["topic"]
            )
            .map_err(|e| PipelineError::Metrics(format!("records_processed: {e}")))?,

            duplicates_skipped: register_counter_vec!(
                "courier_duplicates_skipped_total",
                "Total redelivered records skipped",
                &["topic"]
            )
            .map_err(|e| PipelineError::Metrics(format!("duplicates_skipped: {e}")))?,

            processing_errors: register_counter_vec!(
                "courier_processing_errors_total",
                "Total failed processing attempts and poll errors",
                &["topic"]
            )
            .map_err(|e| PipelineError::Metrics(format!("processing_errors: {e}")))?,

            offset_commits: register_counter_vec!(
                "courier_offset_commits_total",
                "Total offsets committed",
                &["topic"]
            )
            .map_err(|e| PipelineError::Metrics(format!("offset_commits: {e}")))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);
        METRICS
            .get()
            .ok_or_else(|| PipelineError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Producer helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a successful delivery and the attempts it took
    pub fn record_produced(&self, topic: &str, attempts: u32) {
        self.messages_produced.with_label_values(&[topic]).inc();
        self.delivery_attempts
            .with_label_values(&[topic])
            .observe(f64::from(attempts));
    }

    /// Record a scheduled retry
    pub fn record_retry(&self, topic: &str) {
        self.delivery_retries.with_label_values(&[topic]).inc();
    }

    /// Record a failed publish attempt
    pub fn record_delivery_error(&self, topic: &str, kind: &str) {
        self.delivery_errors.with_label_values(&[topic, kind]).inc();
    }

    /// Set circuit breaker state for a channel
    pub fn set_circuit_state(&self, channel: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[channel])
            .set(state.as_metric_value());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dead-letter helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a successful dead-letter forward
    pub fn record_dead_lettered(&self, topic: &str, reason: &str) {
        self.dead_lettered.with_label_values(&[topic, reason]).inc();
    }

    /// Record a failed dead-letter forward
    pub fn record_forwarding_failure(&self, topic: &str) {
        self.forwarding_failures.with_label_values(&[topic]).inc();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Consumer helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a record pulled from the broker
    pub fn record_consumed(&self, topic: &str) {
        self.records_consumed.with_label_values(&[topic]).inc();
    }

    /// Record a successfully processed record
    pub fn record_processed(&self, topic: &str) {
        self.records_processed.with_label_values(&[topic]).inc();
    }

    /// Record a skipped duplicate
    pub fn record_duplicate(&self, topic: &str) {
        self.duplicates_skipped.with_label_values(&[topic]).inc();
    }

    /// Record a failed processing attempt or poll
    pub fn record_processing_error(&self, topic: &str) {
        self.processing_errors.with_label_values(&[topic]).inc();
    }

    /// Record a committed offset
    pub fn record_commit(&self, topic: &str) {
        self.offset_commits.with_label_values(&[topic]).inc();
    }
}

/// Gather all metrics as Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}
