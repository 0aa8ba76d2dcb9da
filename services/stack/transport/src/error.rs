//! Transport error types.

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// A captured failure cause, shared so every waiter observes the same value.
pub type FailureCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors raised when observing a pending operation
#[derive(Error, Debug, Clone)]
pub enum OperationError {
    /// The asynchronous work itself failed (connection reset, protocol violation, ...)
    #[error("communication error: {cause}")]
    Communication {
        /// The failure recorded on the operation
        #[source]
        cause: FailureCause,
    },

    /// The deadline elapsed with no explicit completion
    #[error("operation timed out")]
    Timeout,

    /// The operation succeeded but its result was already taken
    #[error("operation result already taken")]
    ResultTaken,

    /// The handle passed to a strict wait is not a pending operation of the expected type
    #[error("invalid handle: {0}")]
    InvalidHandle(&'static str),
}

impl OperationError {
    /// Whether this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, OperationError::Timeout)
    }

    /// The captured cause of a communication error
    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            OperationError::Communication { cause } => Some(cause),
            _ => None,
        }
    }
}

/// Channel-level errors used as failure causes for outstanding requests
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was shut down while the request was outstanding
    #[error("channel closed")]
    Closed,

    /// The peer reset the connection
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// The peer answered with something we could not accept
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The request handler rejected the request
    #[error("service fault: {0}")]
    ServiceFault(String),
}
