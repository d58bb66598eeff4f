//! Executors that run hooks, startup actions and scheduled task bodies.
//!
//! The coordinators never spawn threads for user code themselves; every
//! fan-out goes through an [`Executor`] supplied by the embedding application.

mod runtime;

pub use runtime::TokioExecutor;

use crate::error::{LifecycleError, Result};
use rayon::ThreadPool;
use std::sync::Arc;

/// A unit of work handed to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs, usually on other threads
///
/// An implementation may refuse a job by returning an error. A refused or
/// dropped job must not be retried by the executor; the caller records it.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job) -> Result<()>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) -> Result<()> {
        (**self).execute(job)
    }
}

/// Shared rayon thread pool
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("lifecore-worker-{index}"))
            .build()
            .map_err(|e| LifecycleError::Executor(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Pool with one thread per available CPU
    pub fn with_available_cpus() -> Result<Self> {
        Self::new(num_cpus::get())
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) -> Result<()> {
        self.pool.spawn(job);
        Ok(())
    }
}

/// Runs every job immediately on the submitting thread
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) -> Result<()> {
        job();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Latch;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_worker_pool_runs_jobs() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.num_threads(), 2);

        let counter = Arc::new(AtomicUsize::new(0));
        let latch = Arc::new(Latch::new(8));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            let latch = Arc::clone(&latch);
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                latch.count_down();
            }))
            .unwrap();
        }

        assert!(latch.wait_timeout(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_inline_executor_runs_on_caller() {
        let caller = std::thread::current().id();
        let ran_on = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&ran_on);
        InlineExecutor
            .execute(Box::new(move || {
                *slot.lock() = Some(std::thread::current().id());
            }))
            .unwrap();
        assert_eq!(*ran_on.lock(), Some(caller));
    }
}
