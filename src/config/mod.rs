//! Configuration for the coordinators and the scheduler.
//!
//! Values come from a [`ConfigService`] (process environment plus explicit
//! overrides) or from JSON. Durations are expressed in milliseconds.

use crate::error::{LifecycleError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;

pub const STARTUP_TIMEOUT_KEY: &str = "LIFECORE_STARTUP_TIMEOUT_MS";
pub const SCHEDULER_SHUTDOWN_TIMEOUT_KEY: &str = "LIFECORE_SCHEDULER_SHUTDOWN_TIMEOUT_MS";
pub const WORKER_THREADS_KEY: &str = "LIFECORE_WORKER_THREADS";
pub const EARLY_RUN_TOLERANCE_KEY: &str = "LIFECORE_EARLY_RUN_TOLERANCE_MS";
pub const LATE_RUN_TOLERANCE_KEY: &str = "LIFECORE_LATE_RUN_TOLERANCE_MS";
pub const READJUST_KEY: &str = "LIFECORE_READJUST_MS";

/// Configuration service
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    /// Service pre-populated from the process environment
    pub fn from_env() -> Self {
        let service = Self::default();
        for (key, value) in env::vars() {
            service.set(&key, &value);
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    /// Parse a millisecond value; `None` when the key is absent
    pub fn get_duration_ms(&self, key: &str) -> Result<Option<Duration>> {
        self.parse::<u64>(key)
            .map(|value| value.map(Duration::from_millis))
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        self.parse(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
                LifecycleError::Config(format!("{key}: invalid value '{raw}': {e}"))
            }),
        }
    }
}

/// Scheduler timing policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// A task due within this window is run now instead of waiting again
    #[serde(with = "millis", rename = "early_run_tolerance_ms")]
    pub early_run_tolerance: Duration,

    /// Runs starting later than this past their nominal instant trigger the late-run hook
    #[serde(with = "millis", rename = "late_run_tolerance_ms")]
    pub late_run_tolerance: Duration,

    /// Longest time the worker sleeps before re-evaluating the queue
    #[serde(with = "millis", rename = "readjust_ms")]
    pub readjust_duration: Duration,

    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            early_run_tolerance: Duration::from_millis(1),
            late_run_tolerance: Duration::from_secs(1),
            readjust_duration: Duration::from_secs(10),
            thread_name: "lifecore-scheduler".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Reject settings the scheduler worker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.readjust_duration.is_zero() {
            return Err(LifecycleError::Config(
                "scheduler readjust duration must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level lifecycle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Bound on the whole startup fan-out; zero waits indefinitely
    #[serde(with = "millis", rename = "startup_timeout_ms")]
    pub startup_timeout: Duration,

    #[serde(with = "millis", rename = "scheduler_shutdown_timeout_ms")]
    pub scheduler_shutdown_timeout: Duration,

    /// Worker pool size; `None` uses one thread per CPU
    pub worker_threads: Option<usize>,

    pub scheduler: SchedulerConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::ZERO,
            scheduler_shutdown_timeout: Duration::from_secs(5),
            worker_threads: None,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl LifecycleConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LifecycleError::Config(e.to_string()))?;
        config.scheduler.validate()?;
        Ok(config)
    }

    /// Build from a config service, falling back to defaults for absent keys
    pub fn from_service(service: &ConfigService) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = service.get_duration_ms(STARTUP_TIMEOUT_KEY)? {
            config.startup_timeout = v;
        }
        if let Some(v) = service.get_duration_ms(SCHEDULER_SHUTDOWN_TIMEOUT_KEY)? {
            config.scheduler_shutdown_timeout = v;
        }
        if let Some(v) = service.get_usize(WORKER_THREADS_KEY)? {
            if v == 0 {
                return Err(LifecycleError::Config(format!(
                    "{WORKER_THREADS_KEY} must be at least 1"
                )));
            }
            config.worker_threads = Some(v);
        }
        if let Some(v) = service.get_duration_ms(EARLY_RUN_TOLERANCE_KEY)? {
            config.scheduler.early_run_tolerance = v;
        }
        if let Some(v) = service.get_duration_ms(LATE_RUN_TOLERANCE_KEY)? {
            config.scheduler.late_run_tolerance = v;
        }
        if let Some(v) = service.get_duration_ms(READJUST_KEY)? {
            if v.is_zero() {
                return Err(LifecycleError::Config(format!(
                    "{READJUST_KEY} must be greater than zero"
                )));
            }
            config.scheduler.readjust_duration = v;
        }
        Ok(config)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_keys() {
        let config = LifecycleConfig::from_service(&ConfigService::default()).unwrap();
        assert_eq!(config, LifecycleConfig::default());
    }

    #[test]
    fn test_overrides_from_service() {
        let service = ConfigService::default();
        service.set(STARTUP_TIMEOUT_KEY, "2500");
        service.set(WORKER_THREADS_KEY, "3");
        service.set(READJUST_KEY, " 200 ");

        let config = LifecycleConfig::from_service(&service).unwrap();
        assert_eq!(config.startup_timeout, Duration::from_millis(2500));
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.scheduler.readjust_duration, Duration::from_millis(200));
        assert_eq!(
            config.scheduler.early_run_tolerance,
            SchedulerConfig::default().early_run_tolerance
        );
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let service = ConfigService::default();
        service.set(LATE_RUN_TOLERANCE_KEY, "soon");
        let err = LifecycleConfig::from_service(&service).unwrap_err();
        assert!(matches!(err, LifecycleError::Config(msg) if msg.contains(LATE_RUN_TOLERANCE_KEY)));
    }

    #[test]
    fn test_zero_worker_threads_rejected() {
        let service = ConfigService::default();
        service.set(WORKER_THREADS_KEY, "0");
        assert!(LifecycleConfig::from_service(&service).is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let config = LifecycleConfig::from_json(
            r#"{ "startup_timeout_ms": 750, "scheduler": { "readjust_ms": 50 } }"#,
        )
        .unwrap();
        assert_eq!(config.startup_timeout, Duration::from_millis(750));
        assert_eq!(config.scheduler.readjust_duration, Duration::from_millis(50));
        assert_eq!(config.scheduler.thread_name, "lifecore-scheduler");
        assert_eq!(
            config.scheduler_shutdown_timeout,
            LifecycleConfig::default().scheduler_shutdown_timeout
        );
    }

    #[test]
    fn test_from_json_rejects_zero_readjust() {
        let err = LifecycleConfig::from_json(r#"{ "scheduler": { "readjust_ms": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Config(msg) if msg.contains("readjust")));
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_env_service_contains_process_env() {
        let service = ConfigService::from_env();
        if let Some((key, value)) = env::vars().next() {
            assert_eq!(service.get(&key), Some(value));
        }
    }
}
