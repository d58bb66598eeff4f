use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Single-assignment value shared with any number of waiters
pub struct Promise<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Promise<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Publish the value. Returns false if the promise was already completed,
    /// in which case the first value is kept.
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.value.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.ready.notify_all();
        true
    }

    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    pub fn is_completed(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Block until the value is available
    pub fn wait(&self) -> T {
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Block until the value is available or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut slot = self.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return Some(value.clone());
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.clone();
            }
        }
    }
}

impl<T: Clone> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}
