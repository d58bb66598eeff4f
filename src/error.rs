//! Error types shared by the coordinators and the scheduler

use crate::lifecycle::Phase;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors reported by lifecycle operations
///
/// The type is `Clone` so that one outcome of a single-shot operation
/// (startup, shutdown) can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    /// An operation was attempted in a state that forbids it
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Operation timed out
    #[error("Timeout during {phase}: {message}")]
    Timeout {
        /// The lifecycle phase where timeout occurred
        phase: String,
        /// Additional error message
        message: String,
    },

    /// Hook execution failed
    #[error("Hook execution failed for {service}: {message}")]
    HookFailed {
        /// Name of the hook or service that failed
        service: String,
        /// Error message
        message: String,
    },

    /// Startup finished with one or more failed actions
    #[error("Startup failed with {failures} failure(s), first: {first}")]
    StartupFailed { failures: usize, first: String },

    /// A hook reported an unrecoverable error
    #[error("Fatal error in {phase} hook '{hook}': {message}")]
    Fatal {
        phase: String,
        hook: String,
        message: String,
    },

    /// A waiter lost the source of the result it was waiting for
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// The executor refused or dropped a job before it ran
    #[error("Executor rejected '{task}' before it ran")]
    Rejected { task: String },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Executor construction or submission failed
    #[error("Executor error: {0}")]
    Executor(String),
}

impl LifecycleError {
    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            phase: phase.into(),
            message: message.into(),
        }
    }

    /// Create a hook failure error
    pub fn hook_failed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HookFailed {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create an interruption error
    pub fn interrupted(msg: impl Into<String>) -> Self {
        Self::Interrupted(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// Marker error for unrecoverable conditions.
///
/// A hook, startup action or scheduled task that returns an error whose chain
/// contains a `Fatal` is never accumulated with ordinary failures: the
/// coordinators propagate it to their caller, the scheduler cancels the task.
///
/// ```rust
/// use lifecore::Fatal;
///
/// let hook = || -> anyhow::Result<()> { Err(Fatal::new("disk gone").into()) };
/// assert!(lifecore::error::is_fatal(&hook().unwrap_err()));
/// ```
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct Fatal(pub String);

impl Fatal {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Returns true when any error in the chain is a [`Fatal`] marker
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Fatal>())
}

/// Outcome of one guarded call into user code
pub(crate) enum Invocation {
    Completed,
    Failed(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Run user code, capturing panics and classifying the error it returns.
pub(crate) fn guarded<F>(f: F) -> Invocation
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(Ok(())) => Invocation::Completed,
        Ok(Err(e)) if is_fatal(&e) => Invocation::Fatal(e),
        Ok(Err(e)) => Invocation::Failed(e),
        Err(payload) => Invocation::Failed(anyhow::anyhow!(
            "panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A failure recorded while running a hook or startup action
#[derive(Clone)]
pub struct HookFailure {
    phase: Phase,
    name: String,
    error: Arc<anyhow::Error>,
}

impl HookFailure {
    pub fn new(phase: Phase, name: impl Into<String>, error: anyhow::Error) -> Self {
        Self {
            phase,
            name: name.into(),
            error: Arc::new(error),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    pub(crate) fn into_fatal(self) -> LifecycleError {
        LifecycleError::Fatal {
            phase: self.phase.to_string(),
            hook: self.name,
            message: format!("{:#}", self.error),
        }
    }
}

impl fmt::Debug for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookFailure")
            .field("phase", &self.phase)
            .field("name", &self.name)
            .field("error", &format_args!("{:#}", self.error))
            .finish()
    }
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hook '{}' failed: {:#}", self.phase, self.name, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_detected_through_context() {
        let err = anyhow::Error::new(Fatal::new("out of descriptors")).context("opening socket");
        assert!(is_fatal(&err));
        assert!(!is_fatal(&anyhow::anyhow!("plain failure")));
    }

    #[test]
    fn test_guarded_classifies_outcomes() {
        assert!(matches!(guarded(|| Ok(())), Invocation::Completed));
        assert!(matches!(
            guarded(|| Err(anyhow::anyhow!("boom"))),
            Invocation::Failed(_)
        ));
        assert!(matches!(
            guarded(|| Err(Fatal::new("gone").into())),
            Invocation::Fatal(_)
        ));
    }

    #[test]
    fn test_guarded_captures_panics() {
        match guarded(|| -> anyhow::Result<()> { panic!("hook exploded") }) {
            Invocation::Failed(e) => assert!(e.to_string().contains("hook exploded")),
            _ => panic!("panic should become a failure"),
        }
    }

    #[test]
    fn test_hook_failure_into_fatal() {
        let failure = HookFailure::new(Phase::Perform, "db", anyhow::anyhow!("lost"));
        let err = failure.into_fatal();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("db"));
    }
}
