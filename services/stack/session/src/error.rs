//! Session error types.

use crate::session::SessionStatus;
use stack_transport::OperationError;
use thiserror::Error;

/// Errors reported by session operations
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// The operation needs an open session
    #[error("session is not open")]
    NotOpen,

    /// The session is busy with another lifecycle transition
    #[error("session is {0}")]
    InvalidState(SessionStatus),

    /// A request failed or timed out
    #[error("{service} request failed: {source}")]
    RequestFailed {
        /// Service the request was sent to
        service: String,
        /// Why the request failed
        #[source]
        source: OperationError,
    },
}

impl SessionError {
    pub(crate) fn request(service: &str, source: OperationError) -> Self {
        SessionError::RequestFailed {
            service: service.to_string(),
            source,
        }
    }

    /// Whether the failure was a request timeout
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SessionError::RequestFailed {
                source: OperationError::Timeout,
                ..
            }
        )
    }
}
