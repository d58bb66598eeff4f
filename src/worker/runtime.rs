use super::{Executor, Job};
use crate::error::Result;
use tokio::runtime::Handle;

/// Runs jobs on the blocking thread pool of a tokio runtime
///
/// Hooks and task bodies are synchronous and may block, so they go through
/// `spawn_blocking` rather than the async worker threads.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor bound to the runtime the caller is running in.
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: Job) -> Result<()> {
        // Dropping the JoinHandle detaches the job.
        drop(self.handle.spawn_blocking(job));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_runs_job_on_blocking_pool() {
        let executor = TokioExecutor::current();
        let flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();

        let seen = Arc::clone(&flag);
        executor
            .execute(Box::new(move || {
                seen.store(true, Ordering::SeqCst);
                let _ = tx.send(());
            }))
            .unwrap();

        rx.await.unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
