//! Error types and failure classification for upstream broker calls.
//!
//! Every [`BrokerError`] is classified into a [`FailureClass`] via
//! [`failure_class`](BrokerError::failure_class), which determines how the
//! circuit breaker treats the failure: ordinary upstream trouble counts
//! toward the consecutive-failure threshold, while a malformed (non-JSON or
//! unexpected-shape) response opens the circuit immediately since it almost
//! always means the session credential has expired.

use thiserror::Error;

/// Errors that can occur while talking to an upstream broker instance.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Ordinary failure contacting the instance (non-2xx, refused
    /// connection, upstream-reported error status). Retryable; counts
    /// toward the circuit breaker threshold.
    #[error("Upstream failure: {instance} - {message}")]
    Upstream {
        /// The instance that failed
        instance: String,
        /// What the upstream (or transport) reported
        message: String,
    },

    /// The instance answered with something that is not the expected JSON
    /// shape. Typically an HTML login page, which means the session is
    /// invalid or expired. Opens the circuit on the first occurrence.
    #[error("Malformed upstream response: {instance} - {message}")]
    Malformed {
        /// The instance that answered
        instance: String,
        /// Parse failure detail
        message: String,
    },

    /// The request exceeded the fixed per-call timeout.
    #[error("Timeout contacting instance: {instance}")]
    Timeout {
        /// The instance that timed out
        instance: String,
    },

    /// The instance rate limited the request (HTTP 429).
    #[error("Rate limited by instance: {instance}")]
    RateLimited {
        /// The instance that rate limited the request
        instance: String,
    },

    /// The upstream accepted the call but rejected the order action.
    #[error("Order rejected: {instance} - {message}")]
    OrderRejected {
        /// The instance that rejected the order
        instance: String,
        /// Rejection reason as reported upstream
        message: String,
    },

    /// A transport-level error below the HTTP layer.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// How the circuit breaker should account for a failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// Counts toward the consecutive-failure threshold.
    Transient,
    /// Opens the circuit immediately (invalid/expired session signal).
    SessionInvalid,
}

impl BrokerError {
    /// Returns the circuit-breaker classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use tradedesk_broker::errors::{BrokerError, FailureClass};
    ///
    /// let error = BrokerError::Malformed {
    ///     instance: "zerodha-main".to_string(),
    ///     message: "expected JSON object".to_string(),
    /// };
    /// assert_eq!(error.failure_class(), FailureClass::SessionInvalid);
    /// ```
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Malformed { .. } => FailureClass::SessionInvalid,

            Self::Upstream { .. }
            | Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::OrderRejected { .. }
            | Self::Network(_) => FailureClass::Transient,
        }
    }

    /// The instance this error originated from, when known.
    pub fn instance(&self) -> Option<&str> {
        match self {
            Self::Upstream { instance, .. }
            | Self::Malformed { instance, .. }
            | Self::Timeout { instance }
            | Self::RateLimited { instance }
            | Self::OrderRejected { instance, .. } => Some(instance),
            Self::Network(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_is_session_invalid() {
        let error = BrokerError::Malformed {
            instance: "inst-1".to_string(),
            message: "invalid JSON".to_string(),
        };
        assert_eq!(error.failure_class(), FailureClass::SessionInvalid);
    }

    #[test]
    fn test_upstream_is_transient() {
        let error = BrokerError::Upstream {
            instance: "inst-1".to_string(),
            message: "HTTP 502".to_string(),
        };
        assert_eq!(error.failure_class(), FailureClass::Transient);
    }

    #[test]
    fn test_timeout_is_transient() {
        let error = BrokerError::Timeout {
            instance: "inst-1".to_string(),
        };
        assert_eq!(error.failure_class(), FailureClass::Transient);
    }

    #[test]
    fn test_instance_accessor() {
        let error = BrokerError::RateLimited {
            instance: "inst-2".to_string(),
        };
        assert_eq!(error.instance(), Some("inst-2"));
    }

    #[test]
    fn test_error_display() {
        let error = BrokerError::Upstream {
            instance: "inst-1".to_string(),
            message: "HTTP 500".to_string(),
        };
        assert_eq!(format!("{}", error), "Upstream failure: inst-1 - HTTP 500");
    }
}
