//! Counting signal used to park a worker until a resolution arrives.

use parking_lot::{Condvar, Mutex};

/// A counting semaphore.
///
/// `signal` may be called from any thread, before or after the matching
/// `wait`; a permit raised early is simply consumed without blocking.
#[derive(Debug, Default)]
pub struct Gate {
    permits: Mutex<usize>,
    raised: Condvar,
}

impl Gate {
    /// Create a gate with no permits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one permit and wake one waiter.
    pub fn signal(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.raised.notify_one();
    }

    /// Block until a permit is available, then consume it.
    pub fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.raised.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Permits raised but not yet consumed.
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_before_wait_does_not_block() {
        let gate = Gate::new();
        gate.signal();
        assert_eq!(gate.available(), 1);
        gate.wait();
        assert_eq!(gate.available(), 0);
    }

    #[test]
    fn test_wait_released_from_other_thread() {
        let gate = Arc::new(Gate::new());
        let raiser = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            raiser.signal();
        });
        gate.wait();
        handle.join().unwrap();
        assert_eq!(gate.available(), 0);
    }

    #[test]
    fn test_permits_are_counted() {
        let gate = Gate::new();
        gate.signal();
        gate.signal();
        gate.wait();
        assert_eq!(gate.available(), 1);
    }
}
