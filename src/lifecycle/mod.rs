//! Lifecycle Coordination Module
//!
//! Coordinates the parallel startup and the phased shutdown of a process.
//!
//! # Lifecycle Phases
//!
//! ```text
//! 1. Startup actions (concurrent)      ← OnStartup
//!    ↓   any failure or timeout jumps straight to shutdown
//! [Running...]
//!    ↓
//! 2. Shutdown announced (signal, admin request, failed startup)
//!    ↓   waits for open prevention sections
//! 3. Prepare (concurrent)              ← OnPrepareShutdown, scheduler stop
//!    ↓ barrier
//! 4. Perform (concurrent)              ← OnShutdown
//!    ↓ barrier
//! 5. Finalize (serial, caller thread)  ← OnFinalize
//! ```
//!
//! A failing hook never stops its siblings or the following phases; every
//! failure is collected into the report handed to all callers.
//!
//! # Example
//!
//! ```rust
//! use lifecore::lifecycle::{ShutdownCoordinator, StartupAction, StartupCoordinator};
//! use lifecore::worker::WorkerPool;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let executor = Arc::new(WorkerPool::new(4).unwrap());
//! let shutdown = ShutdownCoordinator::new(executor.clone());
//! shutdown
//!     .on_perform("database", || {
//!         tracing::info!("Closing database connections");
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let startup = StartupCoordinator::new(executor, shutdown.clone())
//!     .with_actions([StartupAction::new("database", || {
//!         tracing::info!("Initializing database connection");
//!         Ok(())
//!     })]);
//!
//! assert!(startup.start(Duration::from_secs(5)).unwrap().is_success());
//! assert!(shutdown.perform_shutdown().unwrap().is_clean());
//! ```

mod application;
mod hook;
mod shutdown;
mod signal;
mod startup;
mod state;
mod traits;

pub use application::{Application, ApplicationBuilder};
pub use shutdown::{PreventionGuard, ShutdownCoordinator, ShutdownReport};
pub use signal::{ShutdownHandler, shutdown_signal};
pub use startup::{StartupAction, StartupCoordinator, StartupReport, StartupStatus};
pub use state::{Phase, ShutdownState};
pub use traits::{OnFinalize, OnPrepareShutdown, OnShutdown, OnStartup};
