//! Headless runner for the Cadence game loop.
//!
//! Loads configuration, sets up logging, and plays a scripted session
//! (title, play, pause, play) against the real clock, with a tokio timer
//! standing in for the display refresh. When the session ends the loop
//! statistics are printed as JSON.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$CADENCE_CONFIG` or `cadence.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build the scheduler with its collaborators
//! 4. Start the title state
//! 5. Drive refreshes until the session ends
//! 6. Print the session report

mod driver;
mod error;
mod scenes;

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use cadence_core::config::{CadenceConfig, LoggingConfig};
use cadence_core::host::{AlwaysVisible, Collaborators, LoopFlagHost, SystemClock};
use cadence_core::listener::BindingRegistry;
use cadence_core::{LoopStats, Scheduler};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::driver::{DriverSettings, SessionEndReason};
use crate::error::RunnerError;
use crate::scenes::TitleState;

/// Environment variable naming an alternative config file.
const CONFIG_ENV_VAR: &str = "CADENCE_CONFIG";

/// Default config file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "cadence.yaml";

/// What the runner prints when a session ends.
#[derive(Debug, Serialize)]
struct SessionReport<'a> {
    reason: SessionEndReason,
    final_tick: u64,
    key_presses: u64,
    stats: &'a LoopStats,
}

/// Application entry point for the runner.
///
/// # Errors
///
/// Returns an error if configuration, logging, or scheduler setup fails.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), RunnerError> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging)?;
    info!(
        target_ticks_per_second = config.scheduler.target_ticks_per_second,
        tick_choke = config.scheduler.tick_choke,
        freeze_on_blur = config.scheduler.freeze_on_blur,
        refresh_hz = config.runner.refresh_hz,
        "Configuration loaded"
    );

    // 3. Build the scheduler.
    let host = LoopFlagHost::new();
    let handle = host.handle();
    let keyboard = BindingRegistry::new();
    let mut scheduler = Scheduler::new(
        config.scheduler,
        Collaborators {
            clock: Box::new(SystemClock::new()),
            host: Box::new(host),
            visibility: Box::new(AlwaysVisible),
            events: Box::new(keyboard.clone()),
        },
    )?;

    // 4. Start the title state.
    let presses = Rc::new(Cell::new(0));
    let title = TitleState::new(config.runner.play_ticks, Rc::clone(&presses));
    if !scheduler.start(Box::new(title)) {
        return Err(RunnerError::StartRefused);
    }

    // 5. Drive refreshes.
    let settings = DriverSettings {
        refresh_hz: config.runner.refresh_hz,
        max_seconds: config.runner.max_seconds,
        // Two synthetic key presses per second.
        keypress_every: u64::from((config.runner.refresh_hz / 2).max(1)),
    };
    let reason = driver::drive(&mut scheduler, &handle, &keyboard, settings).await;

    // 6. Report.
    let report = SessionReport {
        reason,
        final_tick: scheduler.current_tick(),
        key_presses: presses.get(),
        stats: scheduler.stats(),
    };
    info!(?reason, ticks = report.stats.ticks, draws = report.stats.draws, "Session ended");
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

/// Resolve the config path: `$CADENCE_CONFIG` if set, else `cadence.yaml`.
fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV_VAR)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load configuration from disk, or fall back to defaults when no file
/// exists at the default location. An explicitly named file must exist.
fn load_config() -> Result<CadenceConfig, RunnerError> {
    let path = config_path();
    if path.exists() || path != Path::new(DEFAULT_CONFIG_PATH) {
        Ok(CadenceConfig::from_file(&path)?)
    } else {
        let mut config = CadenceConfig::default();
        config.scheduler.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
fn init_logging(logging: &LoggingConfig) -> Result<(), RunnerError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let result = if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };

    result.map_err(|e| RunnerError::Logging {
        message: format!("{e}"),
    })
}
