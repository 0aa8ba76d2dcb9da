//! Single-shot operation timers.
//!
//! Timers run as tokio tasks on a dedicated runtime so callers can block on
//! operations from plain threads while deadlines keep firing in the background.

use once_cell::sync::Lazy;
use std::time::Instant;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Number of worker threads in the shared timer runtime
const TIMER_WORKER_THREADS: usize = 2;

static GLOBAL_TIMER_SERVICE: Lazy<Option<TimerService>> = Lazy::new(|| match TimerService::new() {
    Ok(service) => Some(service),
    Err(e) => {
        error!("Failed to start operation timer runtime: {}", e);
        None
    }
});

/// Owns the runtime that drives operation timers
#[derive(Debug)]
pub struct TimerService {
    runtime: Runtime,
}

impl TimerService {
    /// Build a timer service with its own runtime
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(TIMER_WORKER_THREADS)
            .thread_name("stack-timer")
            .enable_time()
            .build()?;

        Ok(Self { runtime })
    }

    /// The process-wide timer service, started on first use
    pub fn global() -> Option<&'static TimerService> {
        GLOBAL_TIMER_SERVICE.as_ref()
    }

    /// Handle used to schedule timers on this service
    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }
}

/// A scheduled trigger that runs once when its deadline passes unless stopped first
#[derive(Debug)]
pub struct OperationTimer {
    task: JoinHandle<()>,
}

impl OperationTimer {
    /// Schedule `on_fire` to run at `deadline`.
    ///
    /// `on_fire` runs on the blocking pool of `handle`, so it may block or take locks.
    pub fn schedule<F>(handle: &Handle, deadline: Instant, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = handle.spawn(async move {
            tokio::time::sleep_until(deadline.into()).await;

            if let Err(e) = tokio::task::spawn_blocking(on_fire).await {
                if e.is_panic() {
                    error!("Unexpected error handling operation timeout: {}", e);
                }
            }
        });

        Self { task }
    }

    /// Stop the timer. Returns `true` if it had not fired yet.
    pub fn stop(&self) -> bool {
        if self.task.is_finished() {
            return false;
        }

        self.task.abort();
        debug!("Operation timer stopped before firing");
        true
    }

    /// Whether the timer has fired or been stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
