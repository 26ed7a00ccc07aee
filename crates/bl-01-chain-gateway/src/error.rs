//! Error types for the chain gateway

use thiserror::Error;

/// Errors returned by gateway adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network-level failure (connect, reset, TLS).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request exceeded its deadline.
    #[error("Request timed out after {ms}ms")]
    Timeout {
        /// Configured deadline
        ms: u64,
    },

    /// The node answered with a JSON-RPC error.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },

    /// The chain refused the transaction. Resubmitting the same payload will
    /// not help.
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    /// The chain does not know the transaction (yet).
    #[error("Transaction not found: {0}")]
    NotFound(String),

    /// Payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The response did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_)
                | GatewayError::Timeout { .. }
                | GatewayError::Rpc { .. }
                | GatewayError::NotFound(_)
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::Transport("reset".into()).is_retryable());
        assert!(GatewayError::Timeout { ms: 10 }.is_retryable());
        assert!(GatewayError::NotFound("x".into()).is_retryable());
        assert!(!GatewayError::Rejected("bad".into()).is_retryable());
        assert!(!GatewayError::Serialization("x".into()).is_retryable());
    }
}
