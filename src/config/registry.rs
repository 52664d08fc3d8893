//! Registry and dispatcher configuration structures.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable prefix read by [`RegistryConfig::from_env`].
pub const ENV_PREFIX: &str = "CLUSTER_REGISTRY_";

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of shard threads.
    pub worker_count: usize,
    /// Bounded queue depth per shard.
    pub queue_depth: usize,
    /// Stack size of each shard thread in bytes.
    pub thread_stack_size: usize,
    /// Time each shard gets to exit on shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            queue_depth: 1024,
            thread_stack_size: 2 * 1024 * 1024,
            shutdown_timeout_ms: 2_000,
        }
    }
}

impl DispatcherConfig {
    /// Default configuration: one shard per CPU.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of shard threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the per-shard queue depth.
    #[must_use]
    pub const fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    /// Set the shard thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Set the shutdown timeout.
    #[must_use]
    pub const fn with_shutdown_timeout_ms(mut self, shutdown_timeout_ms: u64) -> Self {
        self.shutdown_timeout_ms = shutdown_timeout_ms;
        self
    }

    /// Shutdown timeout as a [`Duration`].
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate dispatcher configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.queue_depth == 0 {
            return Err("queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.shutdown_timeout_ms == 0 {
            return Err("shutdown_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Dispatcher settings.
    pub dispatcher: DispatcherConfig,
    /// Capacity of the in-memory audit trail; `0` disables auditing.
    pub audit_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            audit_capacity: 1_000,
        }
    }
}

impl RegistryConfig {
    /// Validate all sections.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        self.dispatcher
            .validate()
            .map_err(|e| format!("dispatcher invalid: {e}"))
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `CLUSTER_REGISTRY_*` environment variables,
    /// loading a `.env` file first if one exists. Unset variables take their
    /// defaults.
    ///
    /// Recognized variables: `DISPATCH_WORKERS`, `DISPATCH_QUEUE_DEPTH`,
    /// `DISPATCH_STACK_SIZE`, `DISPATCH_SHUTDOWN_TIMEOUT_MS`, `AUDIT_CAPACITY`.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or a
    /// validation message.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`RegistryConfig::from_env`], reading values through `lookup`
    /// instead of the process environment. `lookup` receives full variable
    /// names.
    ///
    /// # Errors
    ///
    /// Same as [`RegistryConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut cfg = Self::default();
        let d = &mut cfg.dispatcher;
        override_from(&lookup, "DISPATCH_WORKERS", &mut d.worker_count)?;
        override_from(&lookup, "DISPATCH_QUEUE_DEPTH", &mut d.queue_depth)?;
        override_from(&lookup, "DISPATCH_STACK_SIZE", &mut d.thread_stack_size)?;
        override_from(&lookup, "DISPATCH_SHUTDOWN_TIMEOUT_MS", &mut d.shutdown_timeout_ms)?;
        override_from(&lookup, "AUDIT_CAPACITY", &mut cfg.audit_capacity)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn override_from<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    suffix: &str,
    target: &mut T,
) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    if let Some(raw) = lookup(&key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| format!("{key}: cannot parse `{raw}`: {e}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_is_valid() {
        let cfg = RegistryConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.dispatcher.worker_count >= 1);
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CLUSTER_REGISTRY_DISPATCH_WORKERS", "3"),
            ("CLUSTER_REGISTRY_AUDIT_CAPACITY", " 0 "),
        ]
        .into_iter()
        .collect();
        let cfg = RegistryConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(cfg.dispatcher.worker_count, 3);
        assert_eq!(cfg.dispatcher.queue_depth, 1024);
        assert_eq!(cfg.audit_capacity, 0);
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let err = RegistryConfig::from_lookup(|k| {
            (k == "CLUSTER_REGISTRY_DISPATCH_QUEUE_DEPTH").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.starts_with("CLUSTER_REGISTRY_DISPATCH_QUEUE_DEPTH"));
    }
}
