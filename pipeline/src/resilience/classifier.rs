//! Transient/permanent failure classification
//!
//! A retry is only worth paying for when the failure might go away on its
//! own. The [`FailureClassifier`] trait makes that call; the
//! [`DefaultClassifier`] recognises common broker transport failures.

use courier_core::BrokerError;
use std::collections::HashSet;

/// Outcome of classifying a broker error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// May succeed if retried
    Transient,
    /// Will fail the same way every time
    Permanent,
}

impl FailureClass {
    /// Whether a retry is worthwhile
    pub fn is_transient(self) -> bool {
        matches!(self, FailureClass::Transient)
    }
}

/// Strategy deciding whether a broker error is worth retrying
///
/// Any `Fn(&BrokerError) -> FailureClass` closure is a classifier:
///
/// ```
/// use courier_pipeline::resilience::{FailureClass, FailureClassifier};
/// use courier_core::BrokerError;
///
/// let never_retry = |_: &BrokerError| FailureClass::Permanent;
/// assert_eq!(never_retry.classify(&BrokerError::NotReady), FailureClass::Permanent);
/// ```
pub trait FailureClassifier: Send + Sync {
    /// Classify one error
    fn classify(&self, error: &BrokerError) -> FailureClass;
}

impl<F> FailureClassifier for F
where
    F: Fn(&BrokerError) -> FailureClass + Send + Sync,
{
    fn classify(&self, error: &BrokerError) -> FailureClass {
        self(error)
    }
}

/// Broker error codes retried by default
pub const DEFAULT_RETRIABLE_CODES: &[&str] = &[
    "Local_Transport",
    "Local_TimedOut",
    "NotEnoughReplicas",
    "LeaderNotAvailable",
    "RequestTimedOut",
];

/// Lower-cased message fragments that mark an error as transient
const TRANSIENT_MARKERS: &[&str] = &["timeout", "connection", "tempor"];

/// Default classifier
///
/// Transient when any of these hold, permanent otherwise:
/// - the error is a timeout, a connection failure or `NotReady`
/// - the broker rejected the request with a code in the retriable set
/// - the error text contains "timeout", "connection" or "tempor"
///   (case-insensitive)
///
/// The text match is a heuristic and catches e.g. "temporarily unavailable"
/// from brokers that don't supply a code.
#[derive(Debug, Clone)]
pub struct DefaultClassifier {
    retriable_codes: HashSet<String>,
}

impl Default for DefaultClassifier {
    fn default() -> Self {
        Self::with_retriable_codes(DEFAULT_RETRIABLE_CODES.iter().copied())
    }
}

impl DefaultClassifier {
    /// Create the default classifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a classifier with a custom retriable-code set
    pub fn with_retriable_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            retriable_codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Add one code to the retriable set
    pub fn retry_code(mut self, code: impl Into<String>) -> Self {
        self.retriable_codes.insert(code.into());
        self
    }
}

impl FailureClassifier for DefaultClassifier {
    fn classify(&self, error: &BrokerError) -> FailureClass {
        match error {
            BrokerError::Timeout(_) | BrokerError::Connection(_) | BrokerError::NotReady => {
                return FailureClass::Transient;
            }
            BrokerError::Rejected { code, .. } if self.retriable_codes.contains(code) => {
                return FailureClass::Transient;
            }
            _ => {}
        }

        let text = error.to_string().to_lowercase();
        if TRANSIENT_MARKERS.iter().any(|m| text.contains(m)) {
            FailureClass::Transient
        } else {
            FailureClass::Permanent
        }
    }
}
