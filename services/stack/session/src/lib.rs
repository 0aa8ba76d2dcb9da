//! Client sessions for the stack.
//!
//! A [`Session`] sends its lifecycle requests (create, close), service calls
//! and discovery registrations over a [`RequestChannel`](stack_transport::RequestChannel).
//! Each request becomes a [`PendingOperation`](stack_transport::PendingOperation)
//! bounded by the session's operation timeout.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use stack_session::{LoggingObserver, Session, SessionConfig};
//! use stack_transport::{ChannelError, LoopbackChannel, Request, RequestHandler};
//! use std::sync::Arc;
//!
//! # fn example(runtime: tokio::runtime::Handle) -> Result<(), stack_session::SessionError> {
//! let handler: RequestHandler =
//!     Arc::new(|request: &Request| Ok::<_, ChannelError>(request.body.clone()));
//! let channel = Arc::new(LoopbackChannel::new(runtime, handler));
//!
//! let session = Session::new(SessionConfig::default(), channel, Arc::new(LoggingObserver));
//! session.open()?;
//! let reply = session.call("Read", Bytes::from_static(b"ns=2;s=Temperature"))?;
//! println!("read {} bytes", reply.len());
//! session.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod discovery;
pub mod error;
pub mod observer;
pub mod session;

// Re-export main types
pub use discovery::{ServerRegistration, REGISTER_SERVER};
pub use error::SessionError;
pub use observer::{LoggingObserver, NoopObserver, SessionObserver};
pub use session::{Session, SessionConfig, SessionStatus, CLOSE_SESSION, CREATE_SESSION};
