//! Lock-free circuit breaker
//!
//! Guards one delivery channel. After `failure_threshold` consecutive
//! failures the breaker opens and the producer path stops calling the
//! broker, sending messages straight to the dead-letter topic instead. Once
//! `open_duration` has passed, the next [`CircuitBreaker::is_open`] call
//! closes the breaker again and lets a trial delivery through; if that trial
//! fails often enough the breaker simply reopens.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────► Open
//!     ▲                                 │
//!     │   is_open() after open_duration │
//!     └─────────────────────────────────┘
//! ```
//!
//! State lives in two atomics: the consecutive-failure count and the
//! opened-at timestamp (nanoseconds since the breaker was created, plus one,
//! with 0 meaning "not open"). Both transitions go through compare-and-set,
//! so exactly one caller opens the breaker and exactly one caller performs
//! the recovery reset.

use crate::metrics::Metrics;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

const NOT_OPEN: u64 = 0;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    /// Circuit is closed - deliveries flow through
    Closed,
    /// Circuit is open - deliveries go straight to the dead-letter topic
    Open,
    /// Open duration elapsed, the next delivery is a trial
    HalfOpen,
}

impl CircuitState {
    /// Convert to Prometheus metric value (0=Closed, 1=Open, 2=HalfOpen)
    pub fn as_metric_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures to open circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial delivery
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker for one delivery channel
///
/// Shared between concurrent deliveries through an `Arc`.
pub struct CircuitBreaker {
    channel: String,
    config: CircuitBreakerConfig,
    epoch: Instant,
    consecutive_failures: AtomicU32,
    opened_at: AtomicU64,
    /// Metrics: times circuit opened
    open_count: AtomicU64,
    /// Times the open duration expired into a trial delivery
    trial_count: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed breaker for `channel`
    pub fn new(channel: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let breaker = Self {
            channel: channel.into(),
            config,
            epoch: Instant::now(),
            consecutive_failures: AtomicU32::new(0),
            opened_at: AtomicU64::new(NOT_OPEN),
            open_count: AtomicU64::new(0),
            trial_count: AtomicU64::new(0),
        };
        breaker.publish_state();
        breaker
    }

    /// Create a breaker with default configuration
    pub fn with_defaults(channel: impl Into<String>) -> Self {
        Self::new(channel, CircuitBreakerConfig::default())
    }

    /// Channel this breaker guards
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether deliveries must bypass the broker
    ///
    /// When the open duration has elapsed this closes the breaker (clearing
    /// opened-at and the failure count) and returns `false`, which lets the
    /// caller make a trial delivery.
    pub fn is_open(&self) -> bool {
        let opened = self.opened_at.load(Ordering::Acquire);
        if opened == NOT_OPEN {
            return false;
        }

        if !self.expired(opened) {
            return true;
        }

        if self
            .opened_at
            .compare_exchange(opened, NOT_OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.consecutive_failures.store(0, Ordering::Release);
            self.trial_count.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                channel = %self.channel,
                "circuit breaker closed after open duration, allowing trial delivery"
            );
            self.publish_state();
        }
        false
    }

    /// Side-effect-free view of the breaker state
    pub fn state(&self) -> CircuitState {
        match self.opened_at.load(Ordering::Acquire) {
            NOT_OPEN => CircuitState::Closed,
            opened if self.expired(opened) => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }

    /// Record a successful delivery
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self.opened_at.swap(NOT_OPEN, Ordering::AcqRel) != NOT_OPEN {
            tracing::info!(channel = %self.channel, "circuit breaker closed - broker recovered");
            self.publish_state();
        }
    }

    /// Record a failed delivery attempt
    ///
    /// Returns `true` if this call opened the breaker.
    pub fn record_failure(&self) -> bool {
        let failures = self
            .consecutive_failures
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);

        if failures < self.config.failure_threshold {
            return false;
        }

        let opened = self
            .opened_at
            .compare_exchange(NOT_OPEN, self.now(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if opened {
            self.open_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                channel = %self.channel,
                failures = failures,
                open_ms = self.config.open_duration.as_millis() as u64,
                "circuit breaker opened - too many failures"
            );
            self.publish_state();
        }
        opened
    }

    /// Force the breaker closed
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at.store(NOT_OPEN, Ordering::Release);
        tracing::info!(channel = %self.channel, "circuit breaker manually reset");
        self.publish_state();
    }

    /// Current consecutive failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Get count of times circuit has opened
    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }

    /// Get count of times the open duration expired into a trial
    pub fn trial_count(&self) -> u64 {
        self.trial_count.load(Ordering::Relaxed)
    }

    /// Nanoseconds since `epoch`, shifted by one so 0 stays free for NOT_OPEN
    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos())
            .unwrap_or(u64::MAX - 1)
            .saturating_add(1)
    }

    fn expired(&self, opened: u64) -> bool {
        let open_for = self.now().saturating_sub(opened);
        u128::from(open_for) > self.config.open_duration.as_nanos()
    }

    fn publish_state(&self) {
        if let Some(m) = Metrics::get() {
            m.set_circuit_state(&self.channel, self.state());
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("channel", &self.channel)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}
