//! A one-shot event telling the caller the target had its time to start up.
use core::time::Duration;
use std::sync::{Arc, Condvar, Mutex};

/// Single-use readiness event.
///
/// Goes from unset to set exactly once and is never reset. Clones share the same event, so hand
/// one clone to the supervisor and keep another one to wait on.
#[derive(Debug, Clone, Default)]
pub struct ReadinessSignal {
    syncpair: Arc<(Mutex<bool>, Condvar)>,
}

impl ReadinessSignal {
    /// A new, unset signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal and wakes up all waiters.
    ///
    /// Returns `true` if this call did the transition, `false` if it was set already.
    pub fn set(&self) -> bool {
        let (lock, cvar) = &*self.syncpair;
        let mut ready = lock.lock().unwrap();
        if *ready {
            return false;
        }
        *ready = true;
        cvar.notify_all();
        true
    }

    /// Returns `true` once the signal was set
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.syncpair.0.lock().unwrap()
    }

    /// Blocks until the signal is set.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.syncpair;
        let mut ready = lock.lock().unwrap();
        while !*ready {
            ready = cvar.wait(ready).unwrap();
        }
    }

    /// Blocks until the signal is set, or `timeout` passed.
    ///
    /// Returns `true` if the signal is set.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.syncpair;
        let ready = lock.lock().unwrap();
        let (ready, _) = cvar
            .wait_timeout_while(ready, timeout, |ready| !*ready)
            .unwrap();
        *ready
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;
    use std::thread;

    use crate::readiness::ReadinessSignal;

    #[test]
    fn test_set_once() {
        let ready = ReadinessSignal::new();
        assert!(!ready.is_set());
        assert!(!ready.wait_timeout(Duration::from_millis(10)));

        assert!(ready.set());
        assert!(!ready.set());
        assert!(ready.is_set());
        assert!(ready.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_across_threads() {
        let ready = ReadinessSignal::new();
        let waiter = ready.clone();

        let handle = thread::spawn(move || {
            waiter.wait();
            waiter.is_set()
        });

        thread::sleep(Duration::from_millis(20));
        ready.set();
        assert!(handle.join().unwrap());
    }
}
