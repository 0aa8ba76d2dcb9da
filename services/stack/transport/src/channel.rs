//! Request channels.
//!
//! A [`RequestChannel`] starts a request and hands back the [`PendingOperation`]
//! that will carry its response. [`LoopbackChannel`] answers requests in
//! process through an injected handler, which is enough to drive sessions in
//! tests and in the demo binary.

use crate::error::ChannelError;
use crate::operation::PendingOperation;
use crate::requests::RequestTracker;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// A request as seen by the service side
#[derive(Debug, Clone)]
pub struct Request {
    /// Handle correlating the response to the request
    pub request_handle: u32,
    /// Service being invoked
    pub service: String,
    /// Encoded request body
    pub body: Bytes,
}

/// Response delivered to the pending operation of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Handle of the request this answers
    pub request_handle: u32,
    /// Encoded response body
    pub body: Bytes,
}

/// Callback invoked when a request's operation ends
pub type ResponseCallback = Box<dyn FnOnce(&PendingOperation<Response>) + Send + 'static>;

/// Produces the response body for a request on the service side
pub type RequestHandler = Arc<dyn Fn(&Request) -> Result<Bytes, ChannelError> + Send + Sync>;

/// A channel that can carry requests
pub trait RequestChannel: Send + Sync {
    /// Send a request and return the operation that completes with its response.
    ///
    /// The operation times out after `timeout`; zero means it never does.
    fn begin_send(
        &self,
        service: &str,
        body: Bytes,
        timeout: Duration,
        callback: Option<ResponseCallback>,
    ) -> PendingOperation<Response>;
}

/// In-process channel answering requests through a handler
pub struct LoopbackChannel {
    runtime: Handle,
    handler: RequestHandler,
    latency: Duration,
    tracker: Arc<RequestTracker<Response>>,
    closed: AtomicBool,
}

impl LoopbackChannel {
    /// Create a channel answering requests on `runtime`
    pub fn new(runtime: Handle, handler: RequestHandler) -> Self {
        Self {
            runtime,
            handler,
            latency: Duration::ZERO,
            tracker: Arc::new(RequestTracker::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Delay applied before each request is handled
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of requests still waiting for a response
    pub fn outstanding(&self) -> usize {
        self.tracker.outstanding()
    }

    /// Whether the channel has been shut down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the channel, failing every outstanding request
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let failed = self.tracker.fail_all(ChannelError::Closed);
        info!("Loopback channel closed ({} outstanding requests failed)", failed);
    }
}

impl RequestChannel for LoopbackChannel {
    fn begin_send(
        &self,
        service: &str,
        body: Bytes,
        timeout: Duration,
        callback: Option<ResponseCallback>,
    ) -> PendingOperation<Response> {
        // Requests abandoned by their caller or timed out would otherwise stay until the peer answers
        self.tracker.purge_finished();

        let request_handle = self.tracker.next_request_handle();
        let op = self.tracker.begin(request_handle, service, timeout, callback);

        if self.is_closed() {
            warn!("Rejecting {} request on closed channel", service);
            self.tracker
                .on_transport_error(request_handle, ChannelError::Closed);
            return op;
        }

        let request = Request {
            request_handle,
            service: service.to_string(),
            body,
        };
        let handler = Arc::clone(&self.handler);
        let tracker = Arc::clone(&self.tracker);
        let latency = self.latency;

        self.runtime.spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let handle = request.request_handle;
            let outcome = tokio::task::spawn_blocking(move || handler(&request)).await;

            match outcome {
                Ok(Ok(body)) => {
                    tracker.on_response(
                        handle,
                        Response {
                            request_handle: handle,
                            body,
                        },
                    );
                }
                Ok(Err(e)) => {
                    tracker.on_transport_error(handle, e);
                }
                Err(e) => {
                    tracker.on_transport_error(
                        handle,
                        ChannelError::ServiceFault(format!("request handler panicked: {}", e)),
                    );
                }
            }
        });

        debug!("Sent {} request {}", service, request_handle);
        op
    }
}
