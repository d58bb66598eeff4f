//! # Lifecore
//!
//! Process lifecycle coordination for Rust services.
//!
//! Lifecore starts a service's subsystems in parallel, shuts them down in
//! ordered phases and runs background work on a schedule, on threads
//! supplied by the embedding application.
//!
//! ## Features
//!
//! - **Phased Shutdown**: prepare, perform and finalize phases separated by full barriers
//! - **Single-shot Outcomes**: concurrent shutdown or startup callers share one result
//! - **Prevention Sections**: critical sections that hold shutdown back until they exit
//! - **Parallel Startup**: a failed or timed out startup always ends fully shut down
//! - **Drift-free Scheduling**: fixed-rate, fixed-delay and one-shot tasks on one worker thread
//! - **Pluggable Executors**: rayon worker pool, tokio blocking pool or inline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lifecore::prelude::*;
//! use std::time::Duration;
//!
//! struct Database;
//!
//! impl OnStartup for Database {
//!     fn on_startup(&self) -> anyhow::Result<()> {
//!         tracing::info!("Connecting to database");
//!         Ok(())
//!     }
//! }
//!
//! impl OnShutdown for Database {
//!     fn on_shutdown(&self) -> anyhow::Result<()> {
//!         tracing::info!("Closing database connections");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LifecycleConfig::from_service(&ConfigService::from_env())?;
//!     let app = Application::builder()
//!         .config(config)
//!         .register_lifecycle(Arc::new(Database), "database")
//!         .build()?;
//!
//!     app.start()?.into_result()?;
//!
//!     app.scheduler().schedule_named(
//!         "heartbeat",
//!         Schedule::fixed_rate(Duration::ZERO, Duration::from_secs(30)),
//!         || {
//!             tracing::info!("alive");
//!             Ok(())
//!         },
//!     );
//!
//!     // Serve until SIGINT/SIGTERM, then shut down
//!     let report = app.spawn_shutdown_handler().await??;
//!     for failure in report.failures() {
//!         tracing::warn!("{}", failure);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod scheduler;
pub mod sync;
pub mod worker;

// Re-export core types
pub use config::{ConfigService, LifecycleConfig, SchedulerConfig};
pub use error::{Fatal, HookFailure, LifecycleError, Result};
pub use lifecycle::{
    Application, ApplicationBuilder, ShutdownCoordinator, ShutdownReport, ShutdownState,
    StartupCoordinator, StartupReport,
};
pub use scheduler::{Handle, Schedule, Scheduler};
pub use worker::{Executor, WorkerPool};

/// Prelude module for convenient imports
///
/// ```
/// use lifecore::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigService, LifecycleConfig, SchedulerConfig};
    pub use crate::error::{Fatal, HookFailure, LifecycleError, Result};
    pub use crate::lifecycle::{
        Application, ApplicationBuilder, OnFinalize, OnPrepareShutdown, OnShutdown, OnStartup,
        Phase, PreventionGuard, ShutdownCoordinator, ShutdownHandler, ShutdownReport,
        ShutdownState, StartupAction, StartupCoordinator, StartupReport, StartupStatus,
        shutdown_signal,
    };
    pub use crate::scheduler::{Handle, LateRun, LateRunDecision, Schedule, Scheduler, Task};
    pub use crate::worker::{Executor, InlineExecutor, TokioExecutor, WorkerPool};
    pub use std::sync::Arc;
}
