//! Exactly-once completable operations with deadlines.
//!
//! A [`PendingOperation`] is created by whoever starts an asynchronous action
//! (sending a request, opening a channel) and handed to the code that will
//! eventually deliver the result. Exactly one of three transitions ends it:
//! an explicit [`complete`](PendingOperation::complete), an explicit
//! [`fail`](PendingOperation::fail), or the deadline timer firing. The first
//! transition wins; later ones are ignored.
//!
//! Waiting threads block on a [`CompletionSignal`] that is created lazily
//! under the operation guard, so a completion racing with a new waiter can
//! never be missed.

use crate::error::{FailureCause, OperationError};
use crate::signal::CompletionSignal;
use crate::timer::{OperationTimer, TimerService};
use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, trace};

/// Callback invoked exactly once when an operation reaches a terminal state
pub type Callback<T> = Box<dyn FnOnce(&PendingOperation<T>) + Send + 'static>;

type Context = Arc<dyn Any + Send + Sync>;

/// Loosely typed view of an asynchronous operation.
///
/// Used where handles of different result types travel through the same
/// interface, e.g. an operation wrapping the one it was built on.
pub trait AsyncResult: Any + Send + Sync {
    /// Whether the operation has reached a terminal state
    fn is_completed(&self) -> bool;

    /// Whether the operation finished on the thread that started it
    fn completed_synchronously(&self) -> bool {
        false
    }

    /// Access to the concrete handle for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Terminal state of an operation
enum Outcome<T> {
    /// `None` once the result has been taken
    Succeeded(Option<T>),
    Failed(FailureCause),
    TimedOut,
}

impl<T> Outcome<T> {
    /// What a waiter reports when it observes this outcome
    fn observe(&self) -> Result<bool, OperationError> {
        match self {
            Outcome::Succeeded(_) => Ok(true),
            Outcome::Failed(cause) => Err(OperationError::Communication {
                cause: Arc::clone(cause),
            }),
            Outcome::TimedOut => Ok(false),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded(_) => "succeeded",
            Outcome::Failed(_) => "failed",
            Outcome::TimedOut => "timed out",
        }
    }
}

struct OperationState<T> {
    outcome: Option<Outcome<T>>,
    callback: Option<Callback<T>>,
    signal: Option<Arc<CompletionSignal>>,
    timer: Option<OperationTimer>,
    inner: Option<Arc<dyn AsyncResult>>,
    disposed: bool,
}

struct Shared<T> {
    deadline: Option<Instant>,
    context: Option<Context>,
    /// Mirrors `state.outcome.is_some()` for lock-free polling
    completed: AtomicBool,
    state: Mutex<OperationState<T>>,
}

/// Handle to an asynchronous operation that completes exactly once
pub struct PendingOperation<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PendingOperation<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Builder for [`PendingOperation`]
pub struct PendingOperationBuilder<T> {
    callback: Option<Callback<T>>,
    context: Option<Context>,
    timeout: Duration,
    timer: Option<Handle>,
}

impl<T: Send + 'static> PendingOperationBuilder<T> {
    /// Invoke `callback` once the operation completes, fails or times out
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&PendingOperation<T>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Attach an opaque caller value, readable through [`PendingOperation::context`]
    pub fn context<C: Any + Send + Sync>(mut self, context: C) -> Self {
        self.context = Some(Arc::new(context));
        self
    }

    /// Deadline relative to creation. Zero means no deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runtime used for the deadline timer instead of the shared timer service
    pub fn timer(mut self, handle: Handle) -> Self {
        self.timer = Some(handle);
        self
    }

    /// Create the operation, scheduling its timer when both a deadline and a callback exist
    pub fn build(self) -> PendingOperation<T> {
        let deadline = (!self.timeout.is_zero()).then(|| Instant::now() + self.timeout);
        let wants_timer = deadline.is_some() && self.callback.is_some();

        let op = PendingOperation {
            shared: Arc::new(Shared {
                deadline,
                context: self.context,
                completed: AtomicBool::new(false),
                state: Mutex::new(OperationState {
                    outcome: None,
                    callback: self.callback,
                    signal: None,
                    timer: None,
                    inner: None,
                    disposed: false,
                }),
            }),
        };

        if let (Some(deadline), true) = (deadline, wants_timer) {
            let handle = self
                .timer
                .or_else(|| TimerService::global().map(|service| service.handle().clone()));

            match handle {
                Some(handle) => {
                    let target = op.clone();
                    let timer = OperationTimer::schedule(&handle, deadline, move || target.expire());
                    op.lock().timer = Some(timer);
                }
                None => debug!("No timer runtime available; deadline only bounds waits"),
            }
        }

        trace!("Created pending operation (timeout: {:?})", self.timeout);
        op
    }
}

impl<T: Send + 'static> PendingOperation<T> {
    /// Start building an operation
    pub fn builder() -> PendingOperationBuilder<T> {
        PendingOperationBuilder {
            callback: None,
            context: None,
            timeout: Duration::ZERO,
            timer: None,
        }
    }

    /// Create an operation with a deadline and no callback
    pub fn new(timeout: Duration) -> Self {
        Self::builder().timeout(timeout).build()
    }

    fn lock(&self) -> MutexGuard<'_, OperationState<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Complete the operation with `result`.
    ///
    /// Returns `false` if the operation had already reached a terminal state,
    /// in which case the earlier outcome is kept.
    pub fn complete(&self, result: T) -> bool {
        self.finish(Outcome::Succeeded(Some(result)), true)
    }

    /// Record `error` as the failure of the operation and complete it.
    ///
    /// Returns `false` if the operation had already reached a terminal state.
    pub fn fail<E>(&self, error: E) -> bool
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.fail_with_cause(Arc::from(error.into()))
    }

    /// Like [`fail`](Self::fail) with an already shared cause
    pub fn fail_with_cause(&self, cause: FailureCause) -> bool {
        self.finish(Outcome::Failed(cause), true)
    }

    /// Timer-driven transition
    fn expire(&self) {
        if self.finish(Outcome::TimedOut, false) {
            debug!("Pending operation timed out");
        }
    }

    fn finish(&self, outcome: Outcome<T>, stop_timer: bool) -> bool {
        let label = outcome.label();

        let (callback, signal, timer) = {
            let mut state = self.lock();

            if let Some(existing) = &state.outcome {
                debug!(
                    "Ignoring {} transition; operation already {}",
                    label,
                    existing.label()
                );
                let signal = state.signal.clone();
                drop(state);
                if let Some(signal) = signal {
                    signal.set();
                }
                return false;
            }

            state.outcome = Some(outcome);
            self.shared.completed.store(true, Ordering::Release);
            (state.callback.take(), state.signal.clone(), state.timer.take())
        };

        if let Some(timer) = timer {
            if stop_timer {
                timer.stop();
            }
        }

        if let Some(signal) = signal {
            signal.set();
        }

        trace!("Pending operation {}", label);

        if let Some(callback) = callback {
            callback(self);
        }

        true
    }

    /// Wait for the operation to reach a terminal state.
    ///
    /// Blocks until completion or until the deadline (`deadline_override` when
    /// given, otherwise the one fixed at creation) passes. Returns `Ok(true)` on
    /// success and `Ok(false)` on timeout, and raises a recorded failure on every
    /// call, even when the deadline has also passed.
    pub fn wait_for_completion(
        &self,
        deadline_override: Option<Instant>,
    ) -> Result<bool, OperationError> {
        let deadline = deadline_override.or(self.shared.deadline);

        let signal = {
            let mut state = self.lock();

            if let Some(outcome) = &state.outcome {
                return outcome.observe();
            }

            if state.disposed {
                return Ok(false);
            }

            if let Some(deadline) = deadline {
                if deadline <= Instant::now() {
                    return Ok(false);
                }
            }

            // Created under the guard so a concurrent completion either sees it or ran before us
            Arc::clone(
                state
                    .signal
                    .get_or_insert_with(|| Arc::new(CompletionSignal::new())),
            )
        };

        match deadline {
            Some(deadline) => {
                signal.wait_until(deadline);
            }
            None => signal.wait(),
        }

        let state = self.lock();
        match &state.outcome {
            Some(outcome) => outcome.observe(),
            None => Ok(false),
        }
    }

    /// Wait for success and return the result, treating a timeout as an error
    pub fn wait(&self) -> Result<T, OperationError>
    where
        T: Clone,
    {
        wait_for_complete(self)?;
        self.result().ok_or(OperationError::ResultTaken)
    }

    /// Stop the timer and release the wait signal. Safe to call repeatedly.
    ///
    /// Threads blocked in [`wait_for_completion`](Self::wait_for_completion)
    /// wake up and report a timeout unless the operation already completed.
    pub fn dispose(&self) {
        let (timer, signal) = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            (state.timer.take(), state.signal.clone())
        };

        if let Some(timer) = timer {
            timer.stop();
        }
        if let Some(signal) = signal {
            signal.set();
        }
    }

    /// The signal waiters block on, created at most once on first access.
    ///
    /// For an operation that already completed or was disposed the returned
    /// signal is already set.
    pub fn completion_signal(&self) -> Arc<CompletionSignal> {
        let mut state = self.lock();

        if let Some(signal) = &state.signal {
            return Arc::clone(signal);
        }

        let signal = if state.outcome.is_some() || state.disposed {
            CompletionSignal::new_set()
        } else {
            CompletionSignal::new()
        };
        Arc::clone(state.signal.insert(Arc::new(signal)))
    }

    /// Whether the operation reached a terminal state
    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Whether the operation ended because its timer fired
    pub fn is_timed_out(&self) -> bool {
        matches!(self.lock().outcome, Some(Outcome::TimedOut))
    }

    /// Whether the deadline has passed without a result or failure.
    ///
    /// True once the timer has fired, and for operations without a timer
    /// whose deadline is behind us.
    pub fn is_expired(&self) -> bool {
        if self.is_completed() {
            return self.is_timed_out();
        }
        self.shared
            .deadline
            .map(|deadline| deadline <= Instant::now())
            .unwrap_or(false)
    }

    /// Whether [`dispose`](Self::dispose) has been called
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Absolute deadline fixed at creation
    pub fn deadline(&self) -> Option<Instant> {
        self.shared.deadline
    }

    /// The caller value attached at creation, if it is a `C`
    pub fn context<C: Any>(&self) -> Option<&C> {
        self.shared.context.as_deref()?.downcast_ref::<C>()
    }

    /// The recorded failure, if the operation failed
    pub fn failure(&self) -> Option<FailureCause> {
        match &self.lock().outcome {
            Some(Outcome::Failed(cause)) => Some(Arc::clone(cause)),
            _ => None,
        }
    }

    /// The result, if the operation completed successfully
    pub fn result(&self) -> Option<T>
    where
        T: Clone,
    {
        match &self.lock().outcome {
            Some(Outcome::Succeeded(result)) => result.clone(),
            _ => None,
        }
    }

    /// Move the result out, leaving the operation completed but empty
    pub fn take_result(&self) -> Option<T> {
        match &mut self.lock().outcome {
            Some(Outcome::Succeeded(result)) => result.take(),
            _ => None,
        }
    }

    /// Record the operation this one wraps
    pub fn set_inner(&self, inner: Arc<dyn AsyncResult>) {
        self.lock().inner = Some(inner);
    }

    /// The operation this one wraps, if any
    pub fn inner(&self) -> Option<Arc<dyn AsyncResult>> {
        self.lock().inner.clone()
    }
}

impl<T: Send + 'static> AsyncResult for PendingOperation<T> {
    fn is_completed(&self) -> bool {
        PendingOperation::is_completed(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> fmt::Debug for PendingOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("deadline", &self.shared.deadline)
            .field("completed", &self.shared.completed.load(Ordering::Acquire))
            .finish()
    }
}

/// Wait for `op` and turn a timeout into [`OperationError::Timeout`].
///
/// A recorded failure propagates unchanged.
pub fn wait_for_complete<T: Send + 'static>(op: &PendingOperation<T>) -> Result<(), OperationError> {
    if op.wait_for_completion(None)? {
        Ok(())
    } else {
        Err(OperationError::Timeout)
    }
}

/// Strict wait on a loosely typed handle.
///
/// Fails with [`OperationError::InvalidHandle`] if `handle` is not a
/// `PendingOperation<T>`, without touching any operation state.
pub fn wait_for_complete_dyn<T: Send + 'static>(
    handle: &dyn AsyncResult,
) -> Result<(), OperationError> {
    let op = handle
        .as_any()
        .downcast_ref::<PendingOperation<T>>()
        .ok_or(OperationError::InvalidHandle(
            "handle passed to wait is not a pending operation of the expected type",
        ))?;

    wait_for_complete(op)
}
