use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Count-down latch released when its count reaches zero
pub struct Latch {
    remaining: Mutex<usize>,
    released: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            released: Condvar::new(),
        }
    }

    /// Decrement the count, releasing all waiters when it hits zero
    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            if *remaining == 0 {
                self.released.notify_all();
            }
        }
    }

    pub fn count(&self) -> usize {
        *self.remaining.lock()
    }

    /// Block until the count reaches zero
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.released.wait(&mut remaining);
        }
    }

    /// Block until the count reaches zero or `timeout` elapses.
    ///
    /// Returns whether the latch was released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            if self.released.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }
}
