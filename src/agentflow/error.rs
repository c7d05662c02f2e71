//! Error taxonomy for the runtime.
//!
//! Every subsystem reports failures through [`AgentError`], a message plus a
//! coarse [`ErrorKind`]. The kind drives two decisions the runtime makes over
//! and over: whether a transport attempt may be retried
//! ([`AgentError::is_retryable`]) and how a failure should propagate (tool
//! errors are folded back into the conversation, transport errors bubble to
//! the provider caller, lifecycle errors bubble to the API caller).
//!
//! # Example
//!
//! ```rust
//! use agentflow::error::{AgentError, ErrorKind};
//!
//! let err = AgentError::new(ErrorKind::RateLimited, "429 too many requests");
//! assert!(err.is_retryable());
//!
//! let err = AgentError::new(ErrorKind::Auth, "invalid api key");
//! assert!(!err.is_retryable());
//! ```

use std::error::Error;
use std::fmt;

/// Coarse classification of a runtime failure.
///
/// Transport kinds mirror the wire-level failures a provider client can
/// surface; the remaining kinds cover the runtime's own subsystems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP 429 or an equivalent provider-side throttle. Retryable.
    RateLimited,
    /// Any 5xx class server failure. Retryable.
    ServerError(u16),
    /// A transport or tool deadline expired. Retryable at the transport layer.
    Timeout,
    /// The peer reset the connection mid-flight. Retryable.
    ConnectionReset,
    /// The peer refused the connection. Retryable.
    ConnectionRefused,
    /// Name resolution failed. Retryable.
    Dns,
    /// Provider-side quota/resource exhaustion. Retryable.
    ResourceExhausted,
    /// Authentication or authorization failure. Not retryable.
    Auth,
    /// The request itself was rejected as malformed (other 4xx). Not retryable.
    InvalidRequest,
    /// The response stream was malformed (missing finish, bad chunk framing).
    Protocol,
    /// Tool-argument validation failed.
    Validation,
    /// Plan construction or replanning failed.
    Planning,
    /// Task-graph scheduling failed (cycle, dependency failure, agent cap).
    Coordination,
    /// A state machine rejected a transition or was already terminal.
    Lifecycle,
    /// A cancellation scope expired while the operation was in flight.
    Cancelled,
    /// Anything that does not fit the above.
    Other,
}

impl ErrorKind {
    /// Whether a transport attempt that failed with this kind may be retried.
    ///
    /// Matches the retryable class: rate limits, 5xx, timeouts,
    /// connection reset/refused, DNS failures, and resource exhaustion.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::ServerError(_)
                | ErrorKind::Timeout
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionRefused
                | ErrorKind::Dns
                | ErrorKind::ResourceExhausted
        )
    }
}

/// A runtime failure: an [`ErrorKind`] plus a human-readable message.
#[derive(Debug, Clone)]
pub struct AgentError {
    /// Classification used for retry and propagation decisions.
    pub kind: ErrorKind,
    /// Human-readable description, safe to embed in conversation text.
    pub message: String,
}

impl AgentError {
    /// Create an error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an HTTP status code into a transport error.
    ///
    /// `429` maps to [`ErrorKind::RateLimited`], any 5xx to
    /// [`ErrorKind::ServerError`], `401`/`403` to [`ErrorKind::Auth`], and
    /// every other 4xx to [`ErrorKind::InvalidRequest`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use agentflow::error::{AgentError, ErrorKind};
    ///
    /// assert_eq!(AgentError::from_status(429, "slow down").kind, ErrorKind::RateLimited);
    /// assert_eq!(AgentError::from_status(503, "overloaded").kind, ErrorKind::ServerError(503));
    /// assert_eq!(AgentError::from_status(401, "nope").kind, ErrorKind::Auth);
    /// assert_eq!(AgentError::from_status(400, "bad body").kind, ErrorKind::InvalidRequest);
    /// ```
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            429 => ErrorKind::RateLimited,
            401 | 403 => ErrorKind::Auth,
            500..=599 => ErrorKind::ServerError(status),
            400..=499 => ErrorKind::InvalidRequest,
            _ => ErrorKind::Other,
        };
        Self::new(kind, message)
    }

    /// Shorthand for a [`ErrorKind::Timeout`] error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Shorthand for a [`ErrorKind::Cancelled`] error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Shorthand for a [`ErrorKind::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Shorthand for a [`ErrorKind::Protocol`] error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    /// Shorthand for a [`ErrorKind::Planning`] error.
    pub fn planning(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Planning, message)
    }

    /// Shorthand for a [`ErrorKind::Coordination`] error.
    pub fn coordination(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Coordination, message)
    }

    /// Shorthand for a [`ErrorKind::Lifecycle`] error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lifecycle, message)
    }

    /// Shorthand for a [`ErrorKind::Other`] error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }

    /// Whether a transport attempt that produced this error may be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::RateLimited => write!(f, "rate limited: {}", self.message),
            ErrorKind::ServerError(status) => {
                write!(f, "server error ({}): {}", status, self.message)
            }
            ErrorKind::Timeout => write!(f, "timeout: {}", self.message),
            ErrorKind::ConnectionReset => write!(f, "connection reset: {}", self.message),
            ErrorKind::ConnectionRefused => write!(f, "connection refused: {}", self.message),
            ErrorKind::Dns => write!(f, "dns failure: {}", self.message),
            ErrorKind::ResourceExhausted => write!(f, "resource exhausted: {}", self.message),
            ErrorKind::Auth => write!(f, "authentication failed: {}", self.message),
            ErrorKind::InvalidRequest => write!(f, "invalid request: {}", self.message),
            ErrorKind::Protocol => write!(f, "protocol error: {}", self.message),
            ErrorKind::Validation => write!(f, "validation error: {}", self.message),
            ErrorKind::Planning => write!(f, "planning error: {}", self.message),
            ErrorKind::Coordination => write!(f, "coordination error: {}", self.message),
            ErrorKind::Lifecycle => write!(f, "lifecycle error: {}", self.message),
            ErrorKind::Cancelled => write!(f, "cancelled: {}", self.message),
            ErrorKind::Other => write!(f, "{}", self.message),
        }
    }
}

impl Error for AgentError {}
