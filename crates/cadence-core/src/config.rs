//! Configuration loading and typed config structures for Cadence.
//!
//! The canonical configuration lives in `cadence.yaml`. This module defines
//! strongly-typed structs that mirror the YAML structure, and provides a
//! loader that reads and validates the file. Every field has a default, so
//! an empty document is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Environment variable that overrides `scheduler.target_ticks_per_second`.
pub const TPS_ENV_VAR: &str = "CADENCE_TPS";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside its allowed range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level Cadence configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Tick rate, catch-up bound, and freeze policy.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Headless runner settings.
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl CadenceConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `CADENCE_TPS` overrides `scheduler.target_ticks_per_second` when set
    /// to a valid integer. The result is validated before it is returned.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.scheduler.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check every section for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        if self.runner.refresh_hz == 0 {
            return Err(ConfigError::Invalid {
                reason: "runner.refresh_hz must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Scheduler configuration.
///
/// `target_ticks_per_second` and `tick_choke` are fixed for the duration of
/// a session; `freeze_on_blur` may be toggled at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Simulation ticks per second of game time.
    #[serde(default = "default_target_ticks_per_second")]
    pub target_ticks_per_second: u32,

    /// Maximum ticks simulated by a single refresh.
    #[serde(default = "default_tick_choke")]
    pub tick_choke: u32,

    /// Whether hiding the host page freezes game time.
    #[serde(default = "default_true")]
    pub freeze_on_blur: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_ticks_per_second: default_target_ticks_per_second(),
            tick_choke: default_tick_choke(),
            freeze_on_blur: true,
        }
    }
}

impl SchedulerConfig {
    /// Apply `CADENCE_TPS` if it is set and parses as an integer.
    pub fn apply_env_overrides(&mut self) {
        if let Some(tps) = std::env::var(TPS_ENV_VAR)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
        {
            self.target_ticks_per_second = tps;
        }
    }

    /// Reject a zero tick rate or a zero choke.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_ticks_per_second == 0 {
            return Err(ConfigError::Invalid {
                reason: "scheduler.target_ticks_per_second must be at least 1".to_owned(),
            });
        }
        if self.tick_choke == 0 {
            return Err(ConfigError::Invalid {
                reason: "scheduler.tick_choke must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Headless runner configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Simulated display refresh rate in Hz.
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: u32,

    /// Wall-clock limit for a session in seconds (0 = unlimited).
    #[serde(default = "default_max_seconds")]
    pub max_seconds: u64,

    /// Ticks the scripted play state runs before it pops itself.
    #[serde(default = "default_play_ticks")]
    pub play_ticks: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            refresh_hz: default_refresh_hz(),
            max_seconds: default_max_seconds(),
            play_ticks: default_play_ticks(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_target_ticks_per_second() -> u32 {
    30
}

const fn default_tick_choke() -> u32 {
    50
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_refresh_hz() -> u32 {
    60
}

const fn default_max_seconds() -> u64 {
    10
}

const fn default_play_ticks() -> u64 {
    120
}

const fn default_true() -> bool {
    true
}
