//! Lifecycle hook traits
//!
//! Services implement these traits and are registered with an
//! [`ApplicationBuilder`](super::ApplicationBuilder), which turns each
//! implementation into a startup action or a shutdown hook.
//!
//! All hooks take `&self`: the service is shared behind an `Arc` and
//! usually keeps its mutable state behind its own locks.

/// Called during startup, concurrently with the other startup actions
///
/// Use this hook to:
/// - Open connection pools
/// - Bind listeners
/// - Warm caches
///
/// # Example
///
/// ```rust
/// use lifecore::lifecycle::OnStartup;
///
/// struct DatabaseService;
///
/// impl OnStartup for DatabaseService {
///     fn on_startup(&self) -> anyhow::Result<()> {
///         tracing::info!("Opening database connections");
///         Ok(())
///     }
/// }
/// ```
pub trait OnStartup: Send + Sync {
    fn on_startup(&self) -> anyhow::Result<()>;
}

/// Called in the prepare phase of shutdown
///
/// Use this hook to stop accepting new work: close listeners, stop
/// schedulers, deregister from service discovery.
pub trait OnPrepareShutdown: Send + Sync {
    fn on_prepare_shutdown(&self) -> anyhow::Result<()>;
}

/// Called in the perform phase of shutdown
///
/// Use this hook to drain in-flight work and flush buffers.
pub trait OnShutdown: Send + Sync {
    fn on_shutdown(&self) -> anyhow::Result<()>;
}

/// Called in the finalize phase of shutdown
///
/// Finalize hooks run serially on the thread performing the shutdown, so
/// they may tear down the executor itself.
///
/// ```rust
/// use lifecore::lifecycle::OnFinalize;
///
/// struct MetricsFlusher;
///
/// impl OnFinalize for MetricsFlusher {
///     fn on_finalize(&self) -> anyhow::Result<()> {
///         tracing::info!("Flushing final metrics");
///         Ok(())
///     }
/// }
/// ```
pub trait OnFinalize: Send + Sync {
    fn on_finalize(&self) -> anyhow::Result<()>;
}
