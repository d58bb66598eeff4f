use super::Phase;
use crate::error::{HookFailure, Invocation, guarded};
use tracing::{debug, error};

type HookFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// A named, run-once action bound to a phase
pub(crate) struct Hook {
    name: String,
    action: HookFn,
}

/// What happened when a hook ran
pub(crate) enum HookOutcome {
    Completed,
    Failed(HookFailure),
    Fatal(HookFailure),
}

impl Hook {
    pub(crate) fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(action),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Run the hook, logging and classifying any failure
    pub(crate) fn invoke(self, phase: Phase) -> HookOutcome {
        let Hook { name, action } = self;
        debug!(%phase, hook = %name, "running hook");
        match guarded(action) {
            Invocation::Completed => {
                debug!(%phase, hook = %name, "hook completed");
                HookOutcome::Completed
            }
            Invocation::Failed(e) => {
                error!(%phase, hook = %name, "hook failed: {:#}", e);
                HookOutcome::Failed(HookFailure::new(phase, name, e))
            }
            Invocation::Fatal(e) => {
                error!(%phase, hook = %name, "hook reported a fatal error: {:#}", e);
                HookOutcome::Fatal(HookFailure::new(phase, name, e))
            }
        }
    }
}
