//! Error types reported by broker collaborators

use thiserror::Error;

/// Error type for broker operations
///
/// Every publish, poll and commit performed on behalf of the pipeline
/// reports failures through this type. The variants are deliberately coarse:
/// they describe what went wrong at the transport boundary, while deciding
/// whether a failure is worth retrying is left to a
/// `FailureClassifier` in the pipeline crate.
///
/// # Example
///
/// ```
/// use courier_core::BrokerError;
///
/// fn publish() -> Result<(), BrokerError> {
///     Err(BrokerError::Timeout("no ack within 10s".to_string()))
/// }
///
/// match publish() {
///     Ok(_) => println!("delivered"),
///     Err(BrokerError::Timeout(msg)) => println!("timed out: {}", msg),
///     Err(e) => println!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Request timed out
    ///
    /// The transport enforces its own deadline on every round-trip and
    /// reports expiry here.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection error
    ///
    /// Examples: connection refused, broker went away, TLS handshake error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Broker explicitly rejected the request with an error code
    ///
    /// `code` is the broker's symbolic error name (e.g. `NotEnoughReplicas`,
    /// `MessageSizeTooLarge`).
    #[error("broker rejected request [{code}]: {message}")]
    Rejected {
        /// Symbolic broker error code
        code: String,
        /// Human readable reason
        message: String,
    },

    /// Payload could not be serialized or deserialized
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Record failed validation before or at the broker
    #[error("validation failed: {0}")]
    Validation(String),

    /// Send failed for a reason not covered above
    #[error("send failed: {0}")]
    Send(String),

    /// Client is not ready to serve requests
    ///
    /// Typically a transient state during startup or a rebalance.
    #[error("broker client not ready")]
    NotReady,

    /// Client has been shut down
    #[error("broker client shut down: {0}")]
    Shutdown(String),
}

impl BrokerError {
    /// Stable, low-cardinality label for this error
    ///
    /// Used as the key of the per-error-kind counters and as a Prometheus
    /// label value, so it must never carry free text.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Timeout(_) => "Timeout",
            BrokerError::Connection(_) => "Connection",
            BrokerError::Rejected { .. } => "Rejected",
            BrokerError::Serialization(_) => "Serialization",
            BrokerError::Validation(_) => "Validation",
            BrokerError::Send(_) => "Send",
            BrokerError::NotReady => "NotReady",
            BrokerError::Shutdown(_) => "Shutdown",
        }
    }

    /// Broker error code, if the broker supplied one
    pub fn code(&self) -> Option<&str> {
        match self {
            BrokerError::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Shorthand for [`BrokerError::Rejected`]
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        BrokerError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}
