//! Timer-driven refresh loop.
//!
//! Stands in for a display: a [`tokio::time::interval`] ticks at the
//! configured refresh rate and calls [`Scheduler::frame`] for as long as
//! the [`LoopHandle`] says the scheduler wants refreshes. The session also
//! ends on ctrl-c or when the wall-clock limit is hit; in both cases the
//! scheduler is stopped here.

use std::time::Duration;

use cadence_core::host::LoopHandle;
use cadence_core::listener::{BindingRegistry, Event};
use cadence_core::Scheduler;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::scenes::{KEYBOARD, KEYDOWN};

/// Why the refresh loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEndReason {
    /// The scheduler stopped itself (the last state was popped).
    Finished,
    /// The configured wall-clock limit was reached.
    TimeLimit,
    /// ctrl-c was received.
    Interrupted,
}

/// Refresh loop parameters.
#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    /// Refreshes per second.
    pub refresh_hz: u32,
    /// Wall-clock limit in seconds (0 = unlimited).
    pub max_seconds: u64,
    /// Send a synthetic key press every this many refreshes (0 = never).
    pub keypress_every: u64,
}

/// Drive `scheduler` until it stops, the time limit passes, or ctrl-c.
pub async fn drive(
    scheduler: &mut Scheduler,
    handle: &LoopHandle,
    keyboard: &BindingRegistry,
    settings: DriverSettings,
) -> SessionEndReason {
    let period = Duration::from_secs_f64(1.0 / f64::from(settings.refresh_hz.max(1)));
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let deadline = (settings.max_seconds > 0)
        .then(|| Instant::now().checked_add(Duration::from_secs(settings.max_seconds)))
        .flatten();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let keydown = Event::new(KEYBOARD, KEYDOWN.into());
    let mut refreshes: u64 = 0;

    info!(
        refresh_hz = settings.refresh_hz,
        max_seconds = settings.max_seconds,
        "Refresh loop running"
    );

    while handle.is_looping() {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupt received");
                scheduler.stop();
                return SessionEndReason::Interrupted;
            }
            _ = interval.tick() => {
                if deadline.is_some_and(|at| Instant::now() >= at) {
                    info!(max_seconds = settings.max_seconds, "Wall-clock limit reached");
                    scheduler.stop();
                    return SessionEndReason::TimeLimit;
                }

                let report = scheduler.frame();
                refreshes = refreshes.saturating_add(1);
                if report.choked {
                    debug!(deferred_ticks = report.deferred_ticks, "Refresh choked");
                }

                if refreshes.checked_rem(settings.keypress_every) == Some(0) {
                    let delivered = keyboard.dispatch(&keydown);
                    debug!(delivered, "Synthetic key press");
                }
            }
        }
    }

    SessionEndReason::Finished
}
