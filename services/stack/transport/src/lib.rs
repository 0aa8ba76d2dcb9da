//! Asynchronous operation plumbing for the stack transport layer.
//!
//! Every network request in the transport and session layers (opening a
//! channel, sending a request, closing a session, registering with a
//! discovery server) is represented by a [`PendingOperation`]: a handle that
//! completes exactly once, carries an absolute deadline, and can be waited on
//! from any number of threads.
//!
//! ## Features
//!
//! - **Exactly-once completion**: success, failure or timer-driven timeout, first one wins
//! - **Deadlines**: fixed at creation, so repeated waits never restart the budget
//! - **Captured failures**: re-raised to every waiter as [`OperationError::Communication`]
//! - **Request tracking**: [`RequestTracker`] matches responses to outstanding requests
//! - **Loopback channel**: in-process [`RequestChannel`] for tests and demos
//!
//! ## Example
//!
//! ```rust,no_run
//! use stack_transport::{wait_for_complete, PendingOperation};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), stack_transport::OperationError> {
//! let op = PendingOperation::builder()
//!     .timeout(Duration::from_secs(5))
//!     .callback(|op: &PendingOperation<u32>| {
//!         println!("finished, completed={}", op.is_completed());
//!     })
//!     .build();
//!
//! let worker = op.clone();
//! std::thread::spawn(move || {
//!     worker.complete(42);
//! });
//!
//! wait_for_complete(&op)?;
//! assert_eq!(op.result(), Some(42));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod operation;
pub mod requests;
pub mod signal;
pub mod timer;

// Re-export main types
pub use channel::{
    LoopbackChannel, Request, RequestChannel, RequestHandler, Response, ResponseCallback,
};
pub use error::{ChannelError, FailureCause, OperationError};
pub use operation::{
    wait_for_complete, wait_for_complete_dyn, AsyncResult, Callback, PendingOperation,
    PendingOperationBuilder,
};
pub use requests::{RequestContext, RequestTracker};
pub use signal::CompletionSignal;
pub use timer::{OperationTimer, TimerService};
