//! Application Bootstrap
//!
//! Wires an executor, the shutdown and startup coordinators and a scheduler
//! into one [`Application`], and registers services implementing the
//! lifecycle traits with them.

use super::{
    OnFinalize, OnPrepareShutdown, OnShutdown, OnStartup, Phase, ShutdownCoordinator,
    ShutdownHandler, ShutdownReport, StartupAction, StartupCoordinator, StartupReport,
};
use crate::config::LifecycleConfig;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::worker::{Executor, WorkerPool};
use std::sync::Arc;

type HookFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// A fully wired application
///
/// # Example
///
/// ```rust
/// use lifecore::lifecycle::{Application, OnShutdown, OnStartup};
/// use std::sync::Arc;
///
/// struct Cache;
///
/// impl OnStartup for Cache {
///     fn on_startup(&self) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
///
/// impl OnShutdown for Cache {
///     fn on_shutdown(&self) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
///
/// let app = Application::builder()
///     .register_lifecycle(Arc::new(Cache), "cache")
///     .build()
///     .unwrap();
///
/// app.start().unwrap().into_result().unwrap();
/// assert!(app.shutdown().unwrap().is_clean());
/// ```
pub struct Application {
    config: LifecycleConfig,
    executor: Arc<dyn Executor>,
    shutdown: ShutdownCoordinator,
    startup: StartupCoordinator,
    scheduler: Scheduler,
}

impl Application {
    /// Create a new application builder
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    pub fn startup_coordinator(&self) -> &StartupCoordinator {
        &self.startup
    }

    /// The application's scheduler; it is stopped in the prepare phase
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run the startup actions, bounded by the configured startup timeout
    ///
    /// A failed or timed out startup has already shut the application down
    /// when this returns.
    pub fn start(&self) -> Result<StartupReport> {
        self.startup.start(self.config.startup_timeout)
    }

    /// Perform graceful shutdown
    pub fn shutdown(&self) -> Result<ShutdownReport> {
        tracing::info!("Shutting down application...");
        self.shutdown.announce_shutdown();
        let report = self.shutdown.perform_shutdown()?;
        tracing::info!("Application shutdown complete");
        Ok(report)
    }

    /// Create a shutdown handler for graceful shutdown
    pub fn shutdown_handler(&self) -> ShutdownHandler {
        ShutdownHandler::new(self.shutdown.clone())
    }

    /// Spawn a background task that waits for shutdown signals
    /// and performs graceful shutdown automatically.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn_shutdown_handler(&self) -> tokio::task::JoinHandle<Result<ShutdownReport>> {
        let shutdown_handler = self.shutdown_handler();
        tokio::spawn(async move { shutdown_handler.wait_for_shutdown().await })
    }
}

/// Builder for Application
pub struct ApplicationBuilder {
    config: LifecycleConfig,
    executor: Option<Arc<dyn Executor>>,
    actions: Vec<StartupAction>,
    hooks: Vec<(Phase, String, HookFn)>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    /// Create a new application builder
    pub fn new() -> Self {
        Self {
            config: LifecycleConfig::default(),
            executor: None,
            actions: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `executor` instead of a worker pool sized from the config
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn startup_action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.actions.push(StartupAction::new(name, action));
        self
    }

    fn hook<F>(mut self, phase: Phase, name: impl Into<String>, hook: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.hooks.push((phase, name.into(), Box::new(hook)));
        self
    }

    /// Register a service that implements OnStartup
    pub fn on_startup<T>(self, service: Arc<T>, name: impl Into<String>) -> Self
    where
        T: OnStartup + 'static,
    {
        self.startup_action(name, move || service.on_startup())
    }

    /// Register a service that implements OnPrepareShutdown
    pub fn on_prepare_shutdown<T>(self, service: Arc<T>, name: impl Into<String>) -> Self
    where
        T: OnPrepareShutdown + 'static,
    {
        self.hook(Phase::Prepare, name, move || service.on_prepare_shutdown())
    }

    /// Register a service that implements OnShutdown
    pub fn on_shutdown<T>(self, service: Arc<T>, name: impl Into<String>) -> Self
    where
        T: OnShutdown + 'static,
    {
        self.hook(Phase::Perform, name, move || service.on_shutdown())
    }

    /// Register a service that implements OnFinalize
    pub fn on_finalize<T>(self, service: Arc<T>, name: impl Into<String>) -> Self
    where
        T: OnFinalize + 'static,
    {
        self.hook(Phase::Finalize, name, move || service.on_finalize())
    }

    /// Register a service for startup and the perform phase of shutdown
    pub fn register_lifecycle<T>(self, service: Arc<T>, name: impl Into<String>) -> Self
    where
        T: OnStartup + OnShutdown + 'static,
    {
        let name = name.into();
        self.on_startup(Arc::clone(&service), name.clone())
            .on_shutdown(service, name)
    }

    /// Register a service for all lifecycle hooks (full lifecycle)
    pub fn register_full_lifecycle<T>(self, service: Arc<T>, name: impl Into<String>) -> Self
    where
        T: OnStartup + OnPrepareShutdown + OnShutdown + OnFinalize + 'static,
    {
        let name = name.into();
        self.on_startup(Arc::clone(&service), name.clone())
            .on_prepare_shutdown(Arc::clone(&service), name.clone())
            .on_shutdown(Arc::clone(&service), name.clone())
            .on_finalize(service, name)
    }

    /// Build the application
    ///
    /// Creates the executor unless one was supplied, starts the scheduler
    /// and registers every shutdown hook. Startup actions run on
    /// [`Application::start`].
    pub fn build(self) -> Result<Application> {
        let config = self.config;
        let executor: Arc<dyn Executor> = match self.executor {
            Some(executor) => executor,
            None => match config.worker_threads {
                Some(threads) => Arc::new(WorkerPool::new(threads)?),
                None => Arc::new(WorkerPool::with_available_cpus()?),
            },
        };

        let shutdown = ShutdownCoordinator::new(Arc::clone(&executor));
        let scheduler = Scheduler::new(Arc::clone(&executor), config.scheduler.clone());
        scheduler.start()?;
        scheduler.stop_on_prepare(&shutdown, config.scheduler_shutdown_timeout)?;

        for (phase, name, hook) in self.hooks {
            match phase {
                Phase::Prepare => shutdown.on_prepare(name, hook)?,
                Phase::Perform => shutdown.on_perform(name, hook)?,
                Phase::Finalize => shutdown.on_finalize(name, hook)?,
                Phase::Startup => {}
            }
        }

        let startup = StartupCoordinator::new(Arc::clone(&executor), shutdown.clone())
            .with_actions(self.actions);

        tracing::info!("Application assembled");
        Ok(Application {
            config,
            executor,
            shutdown,
            startup,
            scheduler,
        })
    }
}
