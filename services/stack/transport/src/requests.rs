//! Outstanding request tracking for a channel.
//!
//! Every request sent over a channel gets one [`PendingOperation`] keyed by its
//! request handle. Responses and transport failures are matched back to the
//! operation through this table.

use crate::error::{ChannelError, FailureCause};
use crate::operation::PendingOperation;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Caller bookkeeping attached to each request operation
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Handle correlating the response to the request
    pub request_handle: u32,
    /// Service the request was sent to
    pub service: String,
    /// When the request was started
    pub started_at: Instant,
}

/// Table of requests awaiting a response
#[derive(Debug)]
pub struct RequestTracker<T> {
    /// Outstanding operations indexed by request handle
    pending: DashMap<u32, PendingOperation<T>>,
    /// Last request handle handed out
    last_handle: AtomicU32,
}

impl<T: Send + 'static> RequestTracker<T> {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            last_handle: AtomicU32::new(0),
        }
    }

    /// Allocate the next request handle. Handle 0 is never used.
    pub fn next_request_handle(&self) -> u32 {
        loop {
            let handle = self
                .last_handle
                .fetch_add(1, Ordering::Relaxed)
                .wrapping_add(1);
            if handle != 0 {
                return handle;
            }
        }
    }

    /// Register a new outstanding request that times out after `timeout`
    pub fn begin<F>(
        &self,
        request_handle: u32,
        service: &str,
        timeout: Duration,
        callback: Option<F>,
    ) -> PendingOperation<T>
    where
        F: FnOnce(&PendingOperation<T>) + Send + 'static,
    {
        let mut builder = PendingOperation::builder()
            .timeout(timeout)
            .context(RequestContext {
                request_handle,
                service: service.to_string(),
                started_at: Instant::now(),
            });

        if let Some(callback) = callback {
            builder = builder.callback(callback);
        }

        let op = builder.build();
        if let Some(previous) = self.pending.insert(request_handle, op.clone()) {
            warn!("Request handle {} reused while still outstanding", request_handle);
            previous.fail(ChannelError::Protocol(format!(
                "request handle {} reused",
                request_handle
            )));
        }

        debug!(
            "Tracking request {} ({}, timeout {:?})",
            request_handle, service, timeout
        );
        op
    }

    /// Deliver a response. Returns `false` for unknown handles.
    pub fn on_response(&self, request_handle: u32, response: T) -> bool {
        match self.pending.remove(&request_handle) {
            Some((_, op)) => {
                if !op.complete(response) {
                    debug!("Response for request {} arrived after it finished", request_handle);
                }
                true
            }
            None => {
                warn!("Received response for unknown request {}", request_handle);
                false
            }
        }
    }

    /// Report a transport failure for one request. Returns `false` for unknown handles.
    pub fn on_transport_error(&self, request_handle: u32, error: ChannelError) -> bool {
        match self.pending.remove(&request_handle) {
            Some((_, op)) => {
                debug!("Request {} failed: {}", request_handle, error);
                op.fail(error);
                true
            }
            None => {
                warn!("Transport error for unknown request {}: {}", request_handle, error);
                false
            }
        }
    }

    /// Fail every outstanding request with the same cause
    pub fn fail_all(&self, error: ChannelError) -> usize {
        let cause: FailureCause = Arc::new(error);
        let handles: Vec<u32> = self.pending.iter().map(|entry| *entry.key()).collect();

        let mut failed = 0;
        for handle in handles {
            if let Some((_, op)) = self.pending.remove(&handle) {
                if op.fail_with_cause(Arc::clone(&cause)) {
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            debug!("Failed {} outstanding requests: {}", failed, cause);
        }
        failed
    }

    /// Drop entries whose operation already ended (timed out or disposed)
    pub fn purge_finished(&self) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, op| !op.is_completed() && !op.is_disposed());
        let purged = before.saturating_sub(self.pending.len());

        if purged > 0 {
            debug!("Purged {} finished requests", purged);
        }
        purged
    }

    /// Number of outstanding requests
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

impl<T: Send + 'static> Default for RequestTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}
