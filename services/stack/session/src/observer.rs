//! Session notifications.
//!
//! Observers are handed to a session explicitly at construction time; there
//! is no process-wide subscription list.

use crate::error::SessionError;
use crate::session::SessionStatus;
use tracing::{info, warn};

/// Receives notifications about a session
pub trait SessionObserver: Send + Sync {
    /// The session moved to a new lifecycle state
    fn on_state_changed(&self, _session_name: &str, _status: SessionStatus) {}

    /// A request sent on behalf of the session failed or timed out
    fn on_request_failed(&self, _service: &str, _error: &SessionError) {}
}

/// Observer that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Observer that reports notifications through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_state_changed(&self, session_name: &str, status: SessionStatus) {
        info!("Session '{}' is now {}", session_name, status);
    }

    fn on_request_failed(&self, service: &str, error: &SessionError) {
        warn!("{} request failed: {}", service, error);
    }
}
