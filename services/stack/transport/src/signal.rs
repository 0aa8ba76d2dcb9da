//! Manual-reset completion signal shared by the threads waiting on an operation.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A blocking wait primitive that stays set once signalled
#[derive(Debug, Default)]
pub struct CompletionSignal {
    set: Mutex<bool>,
    cvar: Condvar,
}

impl CompletionSignal {
    /// Create an unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal that is already set
    pub fn new_set() -> Self {
        Self {
            set: Mutex::new(true),
            cvar: Condvar::new(),
        }
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the signal and wake every waiter
    pub fn set(&self) {
        *self.flag() = true;
        self.cvar.notify_all();
    }

    /// Whether the signal has been set
    pub fn is_set(&self) -> bool {
        *self.flag()
    }

    /// Block until the signal is set
    pub fn wait(&self) {
        let _guard = self
            .cvar
            .wait_while(self.flag(), |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until the signal is set or `timeout` elapses.
    ///
    /// Returns `true` if the signal was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (guard, _) = self
            .cvar
            .wait_timeout_while(self.flag(), timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Block until the signal is set or `deadline` passes
    pub fn wait_until(&self, deadline: Instant) -> bool {
        self.wait_timeout(deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_timeout_expires() {
        let signal = CompletionSignal::new();
        let start = Instant::now();

        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!signal.is_set());
    }

    #[test]
    fn test_set_wakes_all_waiters() {
        let signal = Arc::new(CompletionSignal::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = Arc::clone(&signal);
                thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        signal.set();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }

    #[test]
    fn test_stays_set() {
        let signal = CompletionSignal::new_set();
        assert!(signal.is_set());

        // Manual reset: waits after set return immediately
        signal.wait();
        assert!(signal.wait_timeout(Duration::ZERO));
        assert!(signal.wait_until(Instant::now()));
    }
}
