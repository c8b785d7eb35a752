// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker pool configuration.
//!
//! Defaults, then `STRAND_*` environment overrides, then whatever the
//! caller sets with the builder methods.
//!
//! | Variable | Maps to |
//! |----------|---------|
//! | `STRAND_WORKERS` | `workers` (0 = available parallelism) |
//! | `STRAND_THREAD_NAME_PREFIX` | `thread_name_prefix` |

use std::thread;

use crate::error::Error;

pub const ENV_WORKERS: &str = "STRAND_WORKERS";
pub const ENV_THREAD_NAME_PREFIX: &str = "STRAND_THREAD_NAME_PREFIX";

/// Used when the platform cannot report its parallelism.
const FALLBACK_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Worker threads. 0 means one per available CPU.
    pub workers: usize,
    /// Worker `n` is named `{prefix}-{n}`.
    pub thread_name_prefix: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            thread_name_prefix: "strand-worker".to_string(),
        }
    }
}

impl RunnerConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply any `STRAND_*` variables that are set. Unset variables leave
    /// the field alone; unparsable ones are an error.
    pub fn apply_env_overrides(&mut self) -> Result<(), Error> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, read: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if let Some(val) = read(ENV_WORKERS) {
            self.workers = val.trim().parse().map_err(|_| {
                Error::precondition(format!("{ENV_WORKERS}: expected a worker count, got {val:?}"))
            })?;
        }
        if let Some(val) = read(ENV_THREAD_NAME_PREFIX) {
            if val.is_empty() {
                return Err(Error::precondition(format!(
                    "{ENV_THREAD_NAME_PREFIX}: must not be empty"
                )));
            }
            self.thread_name_prefix = val;
        }
        Ok(())
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Worker count with 0 resolved against the machine.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(FALLBACK_WORKERS)
        } else {
            self.workers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let c = RunnerConfig::default();
        assert_eq!(c.workers, 0);
        assert_eq!(c.thread_name_prefix, "strand-worker");
        assert!(c.resolved_workers() >= 1);
    }

    #[test]
    fn builder_overrides() {
        let c = RunnerConfig::default().workers(3).thread_name_prefix("io");
        assert_eq!(c.resolved_workers(), 3);
        assert_eq!(c.thread_name_prefix, "io");
    }

    #[test]
    fn env_overrides_apply() {
        let mut c = RunnerConfig::default();
        c.apply_overrides(env(&[(ENV_WORKERS, " 6 "), (ENV_THREAD_NAME_PREFIX, "fs")]))
            .unwrap();
        assert_eq!(c.workers, 6);
        assert_eq!(c.thread_name_prefix, "fs");
    }

    #[test]
    fn unset_env_leaves_fields() {
        let mut c = RunnerConfig::default().workers(2);
        c.apply_overrides(env(&[])).unwrap();
        assert_eq!(c.workers, 2);
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut c = RunnerConfig::default();
        let err = c.apply_overrides(env(&[(ENV_WORKERS, "many")])).unwrap_err();
        assert!(matches!(err, Error::Precondition(ref m) if m.contains(ENV_WORKERS)));
        let err = c
            .apply_overrides(env(&[(ENV_THREAD_NAME_PREFIX, "")]))
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }
}
