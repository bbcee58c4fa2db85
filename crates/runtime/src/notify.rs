//! Coalescing wakeup signal
//!
//! The one piece of cross-thread state the interpreter thread sleeps on. Any
//! thread may [`send`](Notifier::send); the interpreter thread waits with a
//! bounded timeout. Sends that land before the next wait collapse into a
//! single wakeup, so a burst of submissions costs one wakeup rather than one
//! per task.
//!
//! The critical section is a flag write plus `notify_all`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub static TOTAL_WAKEUPS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Default)]
struct Inner {
    pending: Mutex<bool>,
    cond: Condvar,
}

/// Wakeup primitive shared by every bridge of one interpreter context
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the waiter. Safe from any thread.
    pub fn send(&self) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !*pending {
            *pending = true;
            TOTAL_WAKEUPS.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.cond.notify_all();
    }

    /// Consume a pending signal without blocking.
    pub fn try_take(&self) -> bool {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *pending, false)
    }

    /// Block until signalled or until `timeout` elapses.
    ///
    /// Returns `true` if a signal was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Loop guards against spurious wakeups
        while !*pending {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = self
                .inner
                .cond
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *pending = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sends_coalesce() {
        let n = Notifier::new();
        n.send();
        n.send();
        n.send();
        assert!(n.try_take());
        assert!(!n.try_take());
    }

    #[test]
    fn test_wait_times_out_without_signal() {
        let n = Notifier::new();
        let start = Instant::now();
        assert!(!n.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wakes_on_cross_thread_send() {
        let n = Notifier::new();
        let sender = n.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            sender.send();
        });
        assert!(n.wait_timeout(Duration::from_secs(5)));
        worker.join().unwrap();
    }

    #[test]
    fn test_pending_signal_returns_immediately() {
        let n = Notifier::new();
        n.send();
        let start = Instant::now();
        assert!(n.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
