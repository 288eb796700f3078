//! Fault-tolerance building blocks shared by both delivery paths
//!
//! - **BackoffPolicy**: deterministic exponential backoff
//! - **FailureClassifier**: transient vs permanent broker errors
//! - **CircuitBreaker**: stop hammering an unhealthy broker
//! - **DeadLetterForwarder**: park undeliverable payloads on a DLQ topic
//!
//! # Example
//!
//! ```ignore
//! use courier_pipeline::resilience::*;
//!
//! let backoff = BackoffPolicy::new(Duration::from_millis(500));
//! let breaker = Arc::new(CircuitBreaker::with_defaults("banking.transactions"));
//! let forwarder = Arc::new(DeadLetterForwarder::new(publisher, "banking.transactions.dlq", 500));
//! ```

mod backoff;
mod circuit_breaker;
mod classifier;
mod dlq;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classifier::{DEFAULT_RETRIABLE_CODES, DefaultClassifier, FailureClass, FailureClassifier};
pub use dlq::{DeadLetterEnvelope, DeadLetterForwarder, DeadLetterLog, DlqReason};
