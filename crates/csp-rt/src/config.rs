// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker pool configuration.

use std::thread;

use crate::error::ConfigError;

/// Settings for a [`Pool`](crate::pool::Pool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Worker threads. 0 means one per available core.
    pub workers: usize,
    /// Worker thread name prefix; workers are `{prefix}-{id}`.
    pub thread_name: String,
    /// Stack size for worker threads, in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,
    /// Let idle workers steal from busy ones.
    pub steal: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            thread_name: "csp-worker".to_string(),
            stack_size: None,
            steal: true,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn steal(mut self, enabled: bool) -> Self {
        self.steal = enabled;
        self
    }

    /// Worker count with 0 resolved to the host's parallelism.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }

    /// Read `CSP_WORKERS`, `CSP_STACK_SIZE` and `CSP_WORK_STEALING`.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup("CSP_WORKERS") {
            config.workers = parse_usize("CSP_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("CSP_STACK_SIZE") {
            let bytes = parse_usize("CSP_STACK_SIZE", &raw)?;
            config.stack_size = (bytes > 0).then_some(bytes);
        }
        if let Some(raw) = lookup("CSP_WORK_STEALING") {
            config.steal = parse_bool("CSP_WORK_STEALING", &raw)?;
        }
        Ok(config)
    }
}

fn parse_usize(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
        expected: "a non-negative integer",
    })
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            expected: "true or false",
        }),
    }
}
