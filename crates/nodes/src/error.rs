//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The kind decides both the HTTP mapping at the boundary and the agent's
/// retry behaviour: only [`NodeError::Upstream`] is retried.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// A referenced entity (file, node) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The config or input failed schema/semantic validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Transient upstream failure (LLM transport, rate limit, timeout).
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// An agent exhausted its time, iteration, or retry budget.
    #[error("budget exhausted: {0}")]
    Budget(String),

    /// Unexpected failure; detail is already sanitized for persistence.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NodeError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}
