//! Engine settings – read from a TOML file with environment overrides.
//!
//! ```toml
//! max_rule_depth = 30
//! max_monitor_error_count = 6
//! ```
//!
//! Missing keys take their defaults.  After the file is parsed,
//! `REGULATORS_*` environment variables override individual fields.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::environment::DEFAULT_MAX_RULE_DEPTH;
use crate::monitoring::DEFAULT_MAX_MONITOR_ERROR_COUNT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {field} must be at least 1")]
    Invalid { field: &'static str },
}

/// Tunables of the interpreter and the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deepest allowed `run_rule` nesting.
    #[serde(default = "default_max_rule_depth")]
    pub max_rule_depth: usize,

    /// Consecutive monitoring failures of one device before one is reported
    /// at error severity.
    #[serde(default = "default_max_monitor_error_count")]
    pub max_monitor_error_count: usize,
}

fn default_max_rule_depth() -> usize {
    DEFAULT_MAX_RULE_DEPTH
}
fn default_max_monitor_error_count() -> usize {
    DEFAULT_MAX_MONITOR_ERROR_COUNT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rule_depth: default_max_rule_depth(),
            max_monitor_error_count: default_max_monitor_error_count(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`.  Returns `None` if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: EngineConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(Some(cfg))
    }

    /// Apply `REGULATORS_*` environment variable overrides.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `REGULATORS_MAX_RULE_DEPTH` | `max_rule_depth` |
    /// | `REGULATORS_MAX_MONITOR_ERRORS` | `max_monitor_error_count` |
    ///
    /// Values that do not parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Same as [`EngineConfig::apply_env_overrides`] with an injectable
    /// lookup, so tests need not mutate the process environment.
    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(depth) = lookup("REGULATORS_MAX_RULE_DEPTH").and_then(|v| v.parse().ok()) {
            self.max_rule_depth = depth;
        }
        if let Some(max) = lookup("REGULATORS_MAX_MONITOR_ERRORS").and_then(|v| v.parse().ok()) {
            self.max_monitor_error_count = max;
        }
    }

    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when a limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rule_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_rule_depth",
            });
        }
        if self.max_monitor_error_count == 0 {
            return Err(ConfigError::Invalid {
                field: "max_monitor_error_count",
            });
        }
        Ok(())
    }
}
