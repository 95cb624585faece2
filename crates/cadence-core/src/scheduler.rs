//! Fixed-timestep scheduler: maps wall-clock time onto simulated ticks.
//!
//! The scheduler is driven entirely by its [`RefreshHost`]: once per
//! display refresh the host calls [`Scheduler::frame`], which
//!
//! 1. reads game time (wall clock minus start time minus frozen time),
//! 2. runs `update` on the top state until the tick count catches up with
//!    `game_time * target_tps / 1000`, at most `tick_choke` times,
//! 3. computes the interpolation alpha and runs `draw` once, unless the
//!    loop stopped or the top state changed during step 2.
//!
//! Rendering slowdowns are absorbed by running more ticks on the next
//! refresh, never by slowing simulated time. The choke bounds the cost of
//! a single refresh; ticks beyond it are deferred to later refreshes, so
//! under sustained overload simulated time lags wall-clock time.
//!
//! Hiding the host page (with `freeze_on_blur`) opens a freeze window:
//! game time stands still, and the top state's listeners are unwired until
//! the page is visible again.
//!
//! Transitions requested by hooks go into one FIFO queue. The queue is
//! drained after every tick, draw, and externally requested transition;
//! transitions run while draining may queue more at the back.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ConfigError, SchedulerConfig};
use crate::context::{Projection, Request, Timing};
use crate::host::{Clock, Collaborators, EventSource, RefreshHost, Visibility, VisibilitySource};
use crate::state::{HookEnv, HookKind, State, StateId, StateStack};

/// Errors that can occur when building a scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The configuration failed validation.
    #[error("scheduler config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },
}

/// What a single [`Scheduler::frame`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameReport {
    /// Ticks simulated during this refresh.
    pub ticks_run: u32,
    /// Whether `draw` ran.
    pub drew: bool,
    /// Whether the choke ended the tick loop with ticks still due.
    pub choked: bool,
    /// Ticks still owed to this refresh's target when the loop ended.
    pub deferred_ticks: u64,
}

/// Counters for one session (`start()` to `stop()`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopStats {
    /// When the session started.
    pub started_at: Option<DateTime<Utc>>,
    /// Refresh callbacks handled.
    pub frames: u64,
    /// Ticks simulated.
    pub ticks: u64,
    /// `draw` calls made.
    pub draws: u64,
    /// Refreshes whose draw was skipped because the loop stopped or the
    /// top state changed mid-refresh.
    pub skipped_draws: u64,
    /// Refreshes cut short by the tick choke.
    pub choked_frames: u64,
    /// Freeze windows opened.
    pub freezes: u64,
    /// Milliseconds excluded from game time by closed freeze windows.
    pub frozen_ms: f64,
}

/// The game-loop scheduler.
pub struct Scheduler {
    config: SchedulerConfig,
    clock: Box<dyn Clock>,
    host: Box<dyn RefreshHost>,
    visibility: Box<dyn VisibilitySource>,
    events: Box<dyn EventSource>,
    stack: StateStack,
    pending: VecDeque<Request>,
    projected: Projection,

    running: bool,
    start_time: f64,
    freeze_accumulated: f64,
    freeze_started_at: Option<f64>,

    current_tick: u64,
    tick_alpha: f64,
    frame_time: f64,
    tick_time: f64,

    stats: LoopStats,
}

impl Scheduler {
    /// Build a scheduler. It does nothing until [`start`](Self::start).
    pub fn new(config: SchedulerConfig, collaborators: Collaborators) -> Result<Self, SchedulerError> {
        config.validate()?;
        let Collaborators {
            clock,
            host,
            visibility,
            events,
        } = collaborators;
        Ok(Self {
            config,
            clock,
            host,
            visibility,
            events,
            stack: StateStack::new(),
            pending: VecDeque::new(),
            projected: Projection::default(),
            running: false,
            start_time: 0.0,
            freeze_accumulated: 0.0,
            freeze_started_at: None,
            current_tick: 0,
            tick_alpha: 0.0,
            frame_time: 0.0,
            tick_time: 0.0,
            stats: LoopStats::default(),
        })
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Start a session with `initial` as the only state.
    ///
    /// Returns `false` without side effects if already running. Otherwise
    /// resets the clock and tick counters, requests the refresh loop, and
    /// pushes `initial` (running its `init`).
    pub fn start(&mut self, initial: Box<dyn State>) -> bool {
        if self.running {
            debug!(state = initial.name(), "Start refused: already running");
            return false;
        }

        self.running = true;
        self.start_time = self.clock.now_ms();
        self.freeze_accumulated = 0.0;
        self.freeze_started_at = None;
        self.current_tick = 0;
        self.tick_alpha = 0.0;
        self.frame_time = 0.0;
        self.tick_time = 0.0;
        self.stats = LoopStats {
            started_at: Some(Utc::now()),
            ..LoopStats::default()
        };

        info!(
            state = initial.name(),
            target_tps = self.config.target_ticks_per_second,
            tick_choke = self.config.tick_choke,
            freeze_on_blur = self.config.freeze_on_blur,
            "Game loop starting"
        );

        self.host.request_loop();

        self.pending.clear();
        self.projected = Projection::running(1);
        self.with_stack(|stack, env| stack.push(initial, env));
        self.process_pending();

        if self.running && self.visibility.is_hidden() {
            self.set_visibility(Visibility::Hidden);
        }
        true
    }

    /// Stop the session.
    ///
    /// Returns `false` if not running. Otherwise cancels the refresh loop
    /// and pops every state top to bottom, running each `cleanup` and
    /// unwiring its listeners. The stack is always empty afterwards.
    pub fn stop(&mut self) -> bool {
        if !self.projected.stop() {
            return false;
        }
        self.halt();
        self.process_pending();
        true
    }

    /// Cancel the loop and drain the stack. The projection must already
    /// show the loop stopped, so cleanup hooks cannot queue anything.
    fn halt(&mut self) {
        if !self.running {
            return;
        }

        self.running = false;
        self.host.cancel_loop();
        self.close_freeze_window();
        self.with_stack(StateStack::drain);

        info!(
            ticks = self.current_tick,
            frames = self.stats.frames,
            draws = self.stats.draws,
            choked_frames = self.stats.choked_frames,
            frozen_ms = self.stats.frozen_ms,
            "Game loop stopped"
        );
    }

    // -----------------------------------------------------------------------
    // Per-refresh cycle
    // -----------------------------------------------------------------------

    /// Handle one display refresh: run due ticks, then draw.
    ///
    /// Does nothing when not running.
    pub fn frame(&mut self) -> FrameReport {
        if !self.running {
            return FrameReport::default();
        }
        self.stats.frames = self.stats.frames.saturating_add(1);

        let frame_time = self.game_time();
        self.frame_time = frame_time;
        let same_state = self.stack.top_id();
        let target = self.target_tick(frame_time);
        let mut ticks_run: u32 = 0;

        while self.running
            && ticks_run < self.config.tick_choke
            && target > tick_as_f64(self.current_tick)
        {
            self.current_tick = self.current_tick.saturating_add(1);
            ticks_run = ticks_run.saturating_add(1);
            self.stats.ticks = self.stats.ticks.saturating_add(1);

            self.invoke_top(HookKind::Update);
            self.tick_time = self.game_time();
        }

        let deferred_ticks = owed_ticks(target, self.current_tick);
        let choked = self.running && ticks_run >= self.config.tick_choke && deferred_ticks > 0;
        if choked {
            self.stats.choked_frames = self.stats.choked_frames.saturating_add(1);
            debug!(
                tick = self.current_tick,
                deferred_ticks,
                tick_choke = self.config.tick_choke,
                "Tick choke reached; deferring catch-up"
            );
        }

        let drew = self.running && self.stack.top_id() == same_state;
        if drew {
            let raw_alpha = self.target_tick(self.game_time()) - tick_as_f64(self.current_tick) + 1.0;
            self.tick_alpha = raw_alpha.clamp(0.0, 1.0);
            self.stats.draws = self.stats.draws.saturating_add(1);
            self.invoke_top(HookKind::Draw);
        } else {
            self.stats.skipped_draws = self.stats.skipped_draws.saturating_add(1);
        }

        FrameReport {
            ticks_run,
            drew,
            choked,
            deferred_ticks,
        }
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// Simulated milliseconds since `start()`: wall-clock elapsed time
    /// minus every freeze window, including one that is still open.
    ///
    /// Meaningless before the first `start()`.
    pub fn game_time(&self) -> f64 {
        let now = self.clock.now_ms();
        let open_window = self.freeze_started_at.map_or(0.0, |at| now - at);
        (now - self.start_time - self.freeze_accumulated - open_window).max(0.0)
    }

    /// Tick count that `game_time_ms` corresponds to, as a fraction.
    fn target_tick(&self, game_time_ms: f64) -> f64 {
        game_time_ms * f64::from(self.config.target_ticks_per_second) / 1000.0
    }

    /// Handle a visibility transition from the host.
    ///
    /// Hidden (while running with `freeze_on_blur`): open a freeze window
    /// and unwire the top state's listeners. Visible (while a window is
    /// open): close it, add its length to the frozen total, and rewire.
    /// Redundant signals are ignored.
    pub fn set_visibility(&mut self, visibility: Visibility) {
        if !self.running {
            return;
        }
        match visibility {
            Visibility::Hidden => {
                if !self.config.freeze_on_blur || self.freeze_started_at.is_some() {
                    return;
                }
                let now = self.clock.now_ms();
                self.freeze_started_at = Some(now);
                self.stats.freezes = self.stats.freezes.saturating_add(1);
                self.stack.deactivate_top(self.events.as_mut());
                debug!(tick = self.current_tick, "Freeze window opened");
            }
            Visibility::Visible => {
                if self.close_freeze_window() {
                    self.stack.activate_top(self.events.as_mut());
                }
            }
        }
    }

    /// Close an open freeze window. Returns whether one was open.
    fn close_freeze_window(&mut self) -> bool {
        let Some(started_at) = self.freeze_started_at.take() else {
            return false;
        };
        let frozen = (self.clock.now_ms() - started_at).max(0.0);
        self.freeze_accumulated += frozen;
        self.stats.frozen_ms += frozen;
        debug!(tick = self.current_tick, frozen_ms = frozen, "Freeze window closed");
        true
    }

    // -----------------------------------------------------------------------
    // Stack transitions
    // -----------------------------------------------------------------------

    /// Suspend the top state and push `state` on top of it.
    ///
    /// Returns `false` if there is no current state.
    pub fn push_state(&mut self, state: Box<dyn State>) -> bool {
        if !self.projected.push() {
            debug!(state = state.name(), "Push refused: no current state");
            return false;
        }
        self.with_stack(|stack, env| stack.push(state, env));
        self.process_pending();
        true
    }

    /// Pop the top state and resume the one beneath it. Popping the last
    /// state stops the loop.
    ///
    /// Returns `false` if the stack was already empty.
    pub fn pop_state(&mut self) -> bool {
        if !self.projected.pop() {
            return false;
        }
        self.run_pop();
        self.process_pending();
        true
    }

    /// Replace the top state with `state`.
    ///
    /// Returns `false`, leaving the stack untouched, if there is no
    /// current state.
    pub fn change_state(&mut self, state: Box<dyn State>) -> bool {
        if !self.projected.change() {
            debug!(state = state.name(), "Change refused: no current state");
            return false;
        }
        self.with_stack(|stack, env| stack.change(state, env));
        self.process_pending();
        true
    }

    fn run_pop(&mut self) {
        self.with_stack(StateStack::pop);
        if self.stack.is_empty() {
            self.halt();
        }
    }

    /// Apply queued transitions in request order. Each was checked against
    /// the projection when it was queued, so none can be refused here.
    fn process_pending(&mut self) {
        while let Some(request) = self.pending.pop_front() {
            debug!(?request, "Applying requested transition");
            match request {
                Request::Push(state) => self.with_stack(|stack, env| stack.push(state, env)),
                Request::Pop => self.run_pop(),
                Request::Change(state) => {
                    self.with_stack(|stack, env| stack.change(state, env));
                }
                Request::Stop => self.halt(),
            }
        }
        debug_assert_eq!(self.projected.depth, self.stack.depth());
        debug_assert_eq!(self.projected.running, self.running);
    }

    fn invoke_top(&mut self, hook: HookKind) {
        self.with_stack(|stack, env| stack.invoke_top(hook, env));
        self.process_pending();
    }

    /// Run a stack operation with the scheduler's event source and timing,
    /// then queue whatever its hooks requested.
    fn with_stack<R>(&mut self, op: impl FnOnce(&mut StateStack, &mut HookEnv<'_>) -> R) -> R {
        let timing = self.timing();
        let mut env = HookEnv {
            events: self.events.as_mut(),
            timing,
            projection: self.projected,
            frozen: self.freeze_started_at.is_some(),
            requests: Vec::new(),
        };
        let result = op(&mut self.stack, &mut env);
        let HookEnv {
            projection,
            requests,
            ..
        } = env;
        self.projected = projection;
        self.pending.extend(requests);
        result
    }

    fn timing(&self) -> Timing {
        Timing {
            game_time_ms: self.game_time(),
            current_tick: self.current_tick,
            tick_alpha: self.tick_alpha,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Whether a session is in progress.
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Whether a freeze window is open.
    pub const fn is_frozen(&self) -> bool {
        self.freeze_started_at.is_some()
    }

    /// Ticks simulated since `start()`.
    pub const fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Interpolation fraction computed for the most recent draw, clamped
    /// to `[0, 1]`; see [`FrameReport::deferred_ticks`] for choked refreshes.
    pub const fn tick_alpha(&self) -> f64 {
        self.tick_alpha
    }

    /// Game time at the start of the most recent refresh.
    pub const fn last_frame_time(&self) -> f64 {
        self.frame_time
    }

    /// Game time right after the most recent tick.
    pub const fn last_tick_time(&self) -> f64 {
        self.tick_time
    }

    /// Number of states on the stack.
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Identity of the top state.
    pub fn top_id(&self) -> Option<StateId> {
        self.stack.top_id()
    }

    /// Read access to the state stack.
    pub const fn stack(&self) -> &StateStack {
        &self.stack
    }

    /// Counters for the current (or last) session.
    pub const fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Current configuration.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Change the tick rate. Refused (returns `false`) while running or
    /// for a rate of zero.
    pub fn set_target_ticks_per_second(&mut self, tps: u32) -> bool {
        if self.running || tps == 0 {
            return false;
        }
        self.config.target_ticks_per_second = tps;
        true
    }

    /// Change the per-refresh tick limit. Refused (returns `false`) while
    /// running or for a limit of zero.
    pub fn set_tick_choke(&mut self, choke: u32) -> bool {
        if self.running || choke == 0 {
            return false;
        }
        self.config.tick_choke = choke;
        true
    }

    /// Enable or disable freezing on hide. Takes effect at the next
    /// visibility signal; an open window still closes on show.
    pub const fn set_freeze_on_blur(&mut self, enabled: bool) {
        self.config.freeze_on_blur = enabled;
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("running", &self.running)
            .field("current_tick", &self.current_tick)
            .field("frozen", &self.is_frozen())
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

// Tick counts stay far below 2^53 for any realistic session.
#[allow(clippy::cast_precision_loss)]
const fn tick_as_f64(tick: u64) -> f64 {
    tick as f64
}

/// Whole ticks still due against `target`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn owed_ticks(target: f64, current_tick: u64) -> u64 {
    let owed = (target - tick_as_f64(current_tick)).ceil();
    if owed > 0.0 { owed as u64 } else { 0 }
}
