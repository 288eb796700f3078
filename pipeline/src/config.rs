//! Environment-driven configuration for Courier
//!
//! Every setting has a default, so an empty environment yields a usable
//! configuration. Unparseable or out-of-range values fail loudly instead of
//! silently falling back.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `COURIER_TOPIC` | `banking.transactions` |
//! | `COURIER_DLQ_TOPIC` | `banking.transactions.dlq` |
//! | `COURIER_MAX_ATTEMPTS` | `3` |
//! | `COURIER_BASE_BACKOFF_MS` | `1000` |
//! | `COURIER_MAX_BACKOFF_MS` | `30000` |
//! | `COURIER_CIRCUIT_THRESHOLD` | `5` |
//! | `COURIER_CIRCUIT_OPEN_MS` | `60000` |
//! | `COURIER_CONSUMER_MAX_ATTEMPTS` | `3` |
//! | `COURIER_CONSUMER_BACKOFF_MS` | `1000` |
//! | `COURIER_DEDUP_CAPACITY` | `10000` |
//! | `COURIER_DLQ_LOG_CAPACITY` | `500` |
//! | `COURIER_LOG_LEVEL` | `info` |
//! | `COURIER_LOG_FORMAT` | `pretty` |
//! | `COURIER_METRICS_ADDR` | `0.0.0.0:9090` |

use crate::error::{PipelineError, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable, multi-field lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(PipelineError::Config(format!(
                "COURIER_LOG_FORMAT: unknown format '{other}' (expected pretty or json)"
            ))),
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Topic the producer path publishes to
    pub topic: String,
    /// Dead-letter topic shared by both paths
    pub dlq_topic: String,
    /// Producer: total publish attempts per message (initial + retries)
    pub max_attempts: u32,
    /// Producer and consumer: backoff base delay
    pub base_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Consecutive failures that open the circuit breaker
    pub circuit_threshold: u32,
    /// How long the circuit stays open before a trial send
    pub circuit_open_duration: Duration,
    /// Consumer: processing attempts per record
    pub consumer_max_attempts: u32,
    /// Consumer: backoff base delay between processing attempts
    pub consumer_backoff: Duration,
    /// Identities remembered by the dedup ledger
    pub dedup_capacity: usize,
    /// Recently dead-lettered envelopes kept for inspection
    pub dlq_log_capacity: usize,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Metrics HTTP server address
    pub metrics_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topic: "banking.transactions".to_string(),
            dlq_topic: "banking.transactions.dlq".to_string(),
            max_attempts: 3,
            base_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
            circuit_threshold: 5,
            circuit_open_duration: Duration::from_secs(60),
            consumer_max_attempts: 3,
            consumer_backoff: Duration::from_millis(1000),
            dedup_capacity: 10_000,
            dlq_log_capacity: 500,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl Config {
    /// Load configuration from `COURIER_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// `from_env` is this with `std::env::var`; tests pass a map instead of
    /// mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let config = Config {
            topic: lookup("COURIER_TOPIC").unwrap_or(defaults.topic),
            dlq_topic: lookup("COURIER_DLQ_TOPIC").unwrap_or(defaults.dlq_topic),
            max_attempts: parse(&lookup, "COURIER_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            base_backoff: parse_millis(&lookup, "COURIER_BASE_BACKOFF_MS")?
                .unwrap_or(defaults.base_backoff),
            max_backoff: parse_millis(&lookup, "COURIER_MAX_BACKOFF_MS")?
                .unwrap_or(defaults.max_backoff),
            circuit_threshold: parse(&lookup, "COURIER_CIRCUIT_THRESHOLD")?
                .unwrap_or(defaults.circuit_threshold),
            circuit_open_duration: parse_millis(&lookup, "COURIER_CIRCUIT_OPEN_MS")?
                .unwrap_or(defaults.circuit_open_duration),
            consumer_max_attempts: parse(&lookup, "COURIER_CONSUMER_MAX_ATTEMPTS")?
                .unwrap_or(defaults.consumer_max_attempts),
            consumer_backoff: parse_millis(&lookup, "COURIER_CONSUMER_BACKOFF_MS")?
                .unwrap_or(defaults.consumer_backoff),
            dedup_capacity: parse(&lookup, "COURIER_DEDUP_CAPACITY")?
                .unwrap_or(defaults.dedup_capacity),
            dlq_log_capacity: parse(&lookup, "COURIER_DLQ_LOG_CAPACITY")?
                .unwrap_or(defaults.dlq_log_capacity),
            log_level: lookup("COURIER_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse(&lookup, "COURIER_LOG_FORMAT")?.unwrap_or(defaults.log_format),
            metrics_addr: parse(&lookup, "COURIER_METRICS_ADDR")?
                .unwrap_or(defaults.metrics_addr),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(PipelineError::Config("topic must not be empty".into()));
        }
        if self.dlq_topic.is_empty() {
            return Err(PipelineError::Config("dlq_topic must not be empty".into()));
        }
        if self.topic == self.dlq_topic {
            return Err(PipelineError::Config(format!(
                "dlq_topic must differ from topic ('{}')",
                self.topic
            )));
        }
        if self.max_attempts == 0 {
            return Err(PipelineError::Config("max_attempts must be at least 1".into()));
        }
        if self.consumer_max_attempts == 0 {
            return Err(PipelineError::Config(
                "consumer_max_attempts must be at least 1".into(),
            ));
        }
        if self.circuit_threshold == 0 {
            return Err(PipelineError::Config(
                "circuit_threshold must be at least 1".into(),
            ));
        }
        if self.dedup_capacity == 0 {
            return Err(PipelineError::Config(
                "dedup_capacity must be at least 1".into(),
            ));
        }
        if self.max_backoff < self.base_backoff {
            return Err(PipelineError::Config(format!(
                "max_backoff ({:?}) is smaller than base_backoff ({:?})",
                self.max_backoff, self.base_backoff
            )));
        }
        Ok(())
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| PipelineError::Config(format!("{key}: invalid value '{raw}': {e}"))),
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse::<F, u64>(lookup, key)?.map(Duration::from_millis))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_environment_yields_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.topic, "banking.transactions");
        assert_eq!(config.dlq_topic, "banking.transactions.dlq");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_backoff, Duration::from_secs(1));
        assert_eq!(config.max_backoff, Duration::from_secs(30));
        assert_eq!(config.circuit_threshold, 5);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.metrics_addr.port(), 9090);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("COURIER_TOPIC", "orders"),
            ("COURIER_DLQ_TOPIC", "orders.dlq"),
            ("COURIER_MAX_ATTEMPTS", "5"),
            ("COURIER_BASE_BACKOFF_MS", "250"),
            ("COURIER_CIRCUIT_OPEN_MS", "1500"),
            ("COURIER_LOG_FORMAT", "JSON"),
            ("COURIER_METRICS_ADDR", "127.0.0.1:9191"),
        ]))
        .unwrap();

        assert_eq!(config.topic, "orders");
        assert_eq!(config.dlq_topic, "orders.dlq");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_backoff, Duration::from_millis(250));
        assert_eq!(config.circuit_open_duration, Duration::from_millis(1500));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.metrics_addr.port(), 9191);
    }

    #[test]
    fn test_unparseable_value_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("COURIER_MAX_ATTEMPTS", "many")])).unwrap_err();
        assert!(matches!(err, PipelineError::Config(ref msg) if msg.contains("COURIER_MAX_ATTEMPTS")));
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("COURIER_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_dlq_topic_must_differ() {
        let err = Config::from_lookup(lookup_from(&[
            ("COURIER_TOPIC", "same"),
            ("COURIER_DLQ_TOPIC", "same"),
        ]))
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_unknown_log_format() {
        assert!("yaml".parse::<LogFormat>().is_err());
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    }
}
