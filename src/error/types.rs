//! Pool and balancer error types

use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`ConnPool`](crate::pool::ConnPool) operations.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// The pool has been shut down. Terminal, never retry.
    #[error("connection pool is closed")]
    Closed,

    /// `max_active_conns` is already reached.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// No admission slot freed up within `pool_timeout`.
    #[error("connection pool timeout")]
    PoolTimeout,

    /// The caller's cancellation token fired while waiting for a slot.
    #[error("operation cancelled")]
    Cancelled,

    /// The connection failed validation and was discarded.
    #[error("bad connection")]
    BadConnection,

    /// Attempted to close or remove a connection that is still checked out.
    #[error("connection is in use, refusing to close it")]
    ConnInUse,

    /// Dialing a new connection failed. Cached and replayed while the
    /// dial-failure circuit is open.
    #[error("dial failed: {0}")]
    Dial(Arc<anyhow::Error>),

    /// A connection-used hook rejected the connection.
    #[error("connection hook failed: {0}")]
    Hook(Arc<anyhow::Error>),

    /// Closing the underlying transport failed.
    #[error("transport error: {0}")]
    Transport(Arc<anyhow::Error>),
}

impl PoolError {
    /// Whether backing off and calling `get` again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::PoolExhausted | PoolError::PoolTimeout)
    }

    pub(crate) fn dial(err: anyhow::Error) -> Self {
        PoolError::Dial(Arc::new(err))
    }

    pub(crate) fn hook(err: anyhow::Error) -> Self {
        PoolError::Hook(Arc::new(err))
    }

    pub(crate) fn transport(err: anyhow::Error) -> Self {
        PoolError::Transport(Arc::new(err))
    }
}

/// Errors returned by [`LoadBalance`](crate::balance::LoadBalance) strategies.
#[derive(Error, Debug, Clone)]
pub enum BalanceError {
    /// The registry holds no endpoints.
    #[error("no endpoint available")]
    NoEndpoint,

    /// Consistent-hash selection was called without a key.
    #[error("no source key supplied for hash selection")]
    NoSourceKey,

    /// The balancer has been closed.
    #[error("load balancer is closed")]
    Closed,

    /// A weighted strategy was given an endpoint with weight zero.
    #[error("endpoint {0} has an invalid weight of zero")]
    InvalidWeight(String),

    /// An endpoint with the same address is already registered.
    #[error("endpoint {0} is already registered")]
    DuplicateEndpoint(String),

    /// The strategy name did not match any known balance type.
    #[error("unknown load balance type: {0}")]
    UnknownType(String),

    /// An endpoint failed while closing or handing out a resource.
    #[error(transparent)]
    Endpoint(#[from] PoolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(PoolError::PoolExhausted.is_retryable());
        assert!(PoolError::PoolTimeout.is_retryable());
        assert!(!PoolError::Closed.is_retryable());
        assert!(!PoolError::dial(anyhow::anyhow!("refused")).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = PoolError::dial(anyhow::anyhow!("connection refused"));
        assert_eq!(err.to_string(), "dial failed: connection refused");

        let err = BalanceError::InvalidWeight("10.0.0.1:80".to_string());
        assert_eq!(
            err.to_string(),
            "endpoint 10.0.0.1:80 has an invalid weight of zero"
        );

        let err: BalanceError = PoolError::Closed.into();
        assert_eq!(err.to_string(), "connection pool is closed");
    }
}
