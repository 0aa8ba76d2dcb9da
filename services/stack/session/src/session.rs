//! Client session over a request channel.
//!
//! Lifecycle requests (create, close) and service calls are sent through a
//! [`RequestChannel`]; synchronous-style calls block on the returned operation
//! with the strict wait helper and map both communication failures and
//! timeouts onto [`SessionError::RequestFailed`].

use crate::discovery::{ServerRegistration, REGISTER_SERVER};
use crate::error::SessionError;
use crate::observer::SessionObserver;
use bytes::Bytes;
use stack_transport::{
    wait_for_complete, OperationError, PendingOperation, RequestChannel, Response,
    ResponseCallback,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Service name used to create a session
pub const CREATE_SESSION: &str = "CreateSession";

/// Service name used to close a session
pub const CLOSE_SESSION: &str = "CloseSession";

/// Configuration for a client session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Name announced when the session is created
    pub session_name: String,
    /// Timeout applied to every request sent by the session
    pub operation_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_name: "opc-stack session".to_string(),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

/// Lifecycle state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session exists on the server
    Closed,
    /// A create request is in flight
    Opening,
    /// The session is usable
    Open,
    /// A close request is in flight
    Closing,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Closed => "closed",
            SessionStatus::Opening => "opening",
            SessionStatus::Open => "open",
            SessionStatus::Closing => "closing",
        };
        f.write_str(name)
    }
}

enum SessionState {
    Closed,
    Opening,
    Open { token: Bytes },
    Closing,
}

impl SessionState {
    fn status(&self) -> SessionStatus {
        match self {
            SessionState::Closed => SessionStatus::Closed,
            SessionState::Opening => SessionStatus::Opening,
            SessionState::Open { .. } => SessionStatus::Open,
            SessionState::Closing => SessionStatus::Closing,
        }
    }
}

/// A client session layered on a request channel
pub struct Session {
    config: SessionConfig,
    channel: Arc<dyn RequestChannel>,
    observer: Arc<dyn SessionObserver>,
    state: Mutex<SessionState>,
}

impl Session {
    /// Create a closed session
    pub fn new(
        config: SessionConfig,
        channel: Arc<dyn RequestChannel>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            config,
            channel,
            observer,
            state: Mutex::new(SessionState::Closed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: SessionState) {
        let status = next.status();
        *self.lock() = next;
        debug!("Session '{}' -> {}", self.config.session_name, status);
        self.observer
            .on_state_changed(&self.config.session_name, status);
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn status(&self) -> SessionStatus {
        self.lock().status()
    }

    /// Token returned by the server when the session was created
    pub fn token(&self) -> Option<Bytes> {
        match &*self.lock() {
            SessionState::Open { token } => Some(token.clone()),
            _ => None,
        }
    }

    /// Create the session on the server and wait for the answer
    pub fn open(&self) -> Result<(), SessionError> {
        {
            let mut state = self.lock();
            match state.status() {
                SessionStatus::Closed => *state = SessionState::Opening,
                SessionStatus::Open => return Ok(()),
                other => return Err(SessionError::InvalidState(other)),
            }
        }
        self.observer
            .on_state_changed(&self.config.session_name, SessionStatus::Opening);

        let body = Bytes::from(self.config.session_name.clone().into_bytes());
        match self.request(CREATE_SESSION, body) {
            Ok(token) => {
                info!("Session '{}' opened", self.config.session_name);
                self.transition(SessionState::Open { token });
                Ok(())
            }
            Err(e) => {
                self.transition(SessionState::Closed);
                Err(e)
            }
        }
    }

    /// Close the session on the server.
    ///
    /// The session is considered closed locally even if the request fails.
    pub fn close(&self) -> Result<(), SessionError> {
        let token = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, SessionState::Closing) {
                SessionState::Open { token } => token,
                SessionState::Closed => {
                    *state = SessionState::Closed;
                    return Ok(());
                }
                other => {
                    let status = other.status();
                    *state = other;
                    return Err(SessionError::InvalidState(status));
                }
            }
        };
        self.observer
            .on_state_changed(&self.config.session_name, SessionStatus::Closing);

        let result = self.request(CLOSE_SESSION, token).map(|_| ());
        self.transition(SessionState::Closed);
        info!("Session '{}' closed", self.config.session_name);
        result
    }

    /// Call a service and wait for its response body
    pub fn call(&self, service: &str, body: Bytes) -> Result<Bytes, SessionError> {
        self.ensure_open()?;
        self.request(service, body)
    }

    /// Start a service call without waiting.
    ///
    /// `callback` runs once the response arrives, the request fails, or it times out.
    pub fn begin_call(
        &self,
        service: &str,
        body: Bytes,
        callback: Option<ResponseCallback>,
    ) -> Result<PendingOperation<Response>, SessionError> {
        self.ensure_open()?;
        Ok(self
            .channel
            .begin_send(service, body, self.config.operation_timeout, callback))
    }

    /// Register a server with the discovery server reachable over this channel.
    ///
    /// Registration does not need an open session.
    pub fn register_server(&self, registration: &ServerRegistration) -> Result<(), SessionError> {
        self.request(REGISTER_SERVER, registration.to_body())?;
        info!("Registered server {}", registration.server_uri);
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        match self.lock().status() {
            SessionStatus::Open => Ok(()),
            _ => Err(SessionError::NotOpen),
        }
    }

    /// Send a request and block until it completes, fails or times out
    fn request(&self, service: &str, body: Bytes) -> Result<Bytes, SessionError> {
        let op = self
            .channel
            .begin_send(service, body, self.config.operation_timeout, None);

        let outcome = wait_for_complete(&op).and_then(|()| {
            op.result()
                .map(|response| response.body)
                .ok_or(OperationError::ResultTaken)
        });
        op.dispose();

        outcome.map_err(|source| {
            let error = SessionError::request(service, source);
            self.observer.on_request_failed(service, &error);
            error
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use stack_transport::{ChannelError, LoopbackChannel, Request, RequestHandler};
    use std::sync::mpsc;
    use tokio::runtime::Runtime;

    /// Records every notification it receives
    #[derive(Default)]
    struct RecordingObserver {
        states: Mutex<Vec<SessionStatus>>,
        failures: Mutex<Vec<(String, bool)>>,
    }

    impl SessionObserver for RecordingObserver {
        fn on_state_changed(&self, _session_name: &str, status: SessionStatus) {
            self.states.lock().unwrap().push(status);
        }

        fn on_request_failed(&self, service: &str, error: &SessionError) {
            self.failures
                .lock()
                .unwrap()
                .push((service.to_string(), error.is_timeout()));
        }
    }

    fn server_handler() -> RequestHandler {
        Arc::new(|request: &Request| match request.service.as_str() {
            CREATE_SESSION => Ok(Bytes::from(format!("token-{}", request.request_handle))),
            CLOSE_SESSION => Ok(Bytes::new()),
            REGISTER_SERVER => Ok(Bytes::new()),
            "Read" => Ok(Bytes::from_static(b"42")),
            "Slow" => {
                std::thread::sleep(Duration::from_millis(300));
                Ok(Bytes::new())
            }
            "Hang" => {
                std::thread::sleep(Duration::from_millis(500));
                Ok(Bytes::new())
            }
            "Reset" => Err(ChannelError::ConnectionReset("socket closed by peer".into())),
            other => Err(ChannelError::ServiceFault(format!("unknown service {}", other))),
        })
    }

    fn session_with(
        runtime: &Runtime,
        timeout: Duration,
        observer: Arc<dyn SessionObserver>,
    ) -> (Session, Arc<LoopbackChannel>) {
        let channel = Arc::new(LoopbackChannel::new(
            runtime.handle().clone(),
            server_handler(),
        ));
        let config = SessionConfig {
            session_name: "test session".to_string(),
            operation_timeout: timeout,
        };
        (Session::new(config, channel.clone(), observer), channel)
    }

    #[test]
    fn test_open_call_close() {
        let runtime = Runtime::new().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let (session, _channel) = session_with(&runtime, Duration::from_secs(2), observer.clone());

        assert_eq!(session.status(), SessionStatus::Closed);
        session.open().unwrap();
        assert_eq!(session.status(), SessionStatus::Open);
        assert!(session.token().unwrap().starts_with(b"token-"));

        // Opening an open session is a no-op
        session.open().unwrap();

        let value = session.call("Read", Bytes::new()).unwrap();
        assert_eq!(value, Bytes::from_static(b"42"));

        session.close().unwrap();
        assert_eq!(session.status(), SessionStatus::Closed);
        assert!(session.token().is_none());
        session.close().unwrap();

        assert_eq!(
            *observer.states.lock().unwrap(),
            vec![
                SessionStatus::Opening,
                SessionStatus::Open,
                SessionStatus::Closing,
                SessionStatus::Closed,
            ]
        );
        assert!(observer.failures.lock().unwrap().is_empty());
    }

    #[test]
    fn test_call_requires_open_session() {
        let runtime = Runtime::new().unwrap();
        let (session, channel) =
            session_with(&runtime, Duration::from_secs(2), Arc::new(NoopObserver));

        assert!(matches!(
            session.call("Read", Bytes::new()),
            Err(SessionError::NotOpen)
        ));
        assert!(matches!(
            session.begin_call("Read", Bytes::new(), None),
            Err(SessionError::NotOpen)
        ));
        assert_eq!(channel.outstanding(), 0);
    }

    #[test]
    fn test_timeout_maps_to_request_failure() {
        let runtime = Runtime::new().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let (session, _channel) =
            session_with(&runtime, Duration::from_millis(50), observer.clone());

        session.open().unwrap();
        let err = session.call("Slow", Bytes::new()).unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Slow request failed: operation timed out");
        assert_eq!(
            *observer.failures.lock().unwrap(),
            vec![("Slow".to_string(), true)]
        );

        // The session itself stays usable
        assert_eq!(session.call("Read", Bytes::new()).unwrap(), Bytes::from_static(b"42"));
    }

    #[test]
    fn test_timed_out_calls_do_not_accumulate() {
        let runtime = Runtime::new().unwrap();
        let (session, channel) =
            session_with(&runtime, Duration::from_millis(30), Arc::new(NoopObserver));
        session.open().unwrap();

        for _ in 0..5 {
            assert!(session.call("Hang", Bytes::new()).unwrap_err().is_timeout());
        }

        session.call("Read", Bytes::new()).unwrap();
        assert_eq!(channel.outstanding(), 0);
    }

    #[test]
    fn test_communication_error_maps_to_request_failure() {
        let runtime = Runtime::new().unwrap();
        let (session, _channel) =
            session_with(&runtime, Duration::from_secs(2), Arc::new(NoopObserver));

        session.open().unwrap();
        match session.call("Reset", Bytes::new()) {
            Err(SessionError::RequestFailed {
                service,
                source: OperationError::Communication { cause },
            }) => {
                assert_eq!(service, "Reset");
                assert_eq!(cause.to_string(), "connection reset: socket closed by peer");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_failed_open_leaves_session_closed() {
        let runtime = Runtime::new().unwrap();
        let (session, channel) =
            session_with(&runtime, Duration::from_secs(2), Arc::new(NoopObserver));

        channel.shutdown();
        let err = session.open().unwrap_err();

        assert!(matches!(err, SessionError::RequestFailed { .. }));
        assert!(!err.is_timeout());
        assert_eq!(session.status(), SessionStatus::Closed);
    }

    #[test]
    fn test_close_after_channel_loss_still_closes() {
        let runtime = Runtime::new().unwrap();
        let (session, channel) =
            session_with(&runtime, Duration::from_secs(2), Arc::new(NoopObserver));

        session.open().unwrap();
        channel.shutdown();

        assert!(session.close().is_err());
        assert_eq!(session.status(), SessionStatus::Closed);
    }

    #[test]
    fn test_begin_call_invokes_callback() {
        let runtime = Runtime::new().unwrap();
        let (session, _channel) =
            session_with(&runtime, Duration::from_secs(2), Arc::new(NoopObserver));
        session.open().unwrap();

        let (tx, rx) = mpsc::channel();
        let op = session
            .begin_call(
                "Read",
                Bytes::new(),
                Some(Box::new(move |op: &PendingOperation<Response>| {
                    let _ = tx.send(op.result().map(|response| response.body));
                })),
            )
            .unwrap();

        let delivered = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(delivered, Some(Bytes::from_static(b"42")));
        assert!(op.is_completed());
    }

    #[test]
    fn test_register_server_without_session() {
        let runtime = Runtime::new().unwrap();
        let (session, _channel) =
            session_with(&runtime, Duration::from_secs(2), Arc::new(NoopObserver));

        let registration = ServerRegistration::new("urn:test:server", "urn:test:product")
            .with_discovery_url("opc.tcp://localhost:4840");
        session.register_server(&registration).unwrap();
        assert_eq!(session.status(), SessionStatus::Closed);
    }
}
