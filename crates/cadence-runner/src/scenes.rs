//! Scripted states played by the headless runner.
//!
//! The session walks through every kind of transition the stack supports:
//!
//! - [`TitleState`] changes itself into [`PlayState`] after a short delay.
//! - [`PlayState`] moves a point along a line, pushes a [`PauseState`]
//!   halfway through, and pops itself once its tick budget is spent,
//!   which ends the session.
//! - [`PauseState`] pops itself after a fixed number of ticks.
//!
//! `PlayState` also binds a `keydown` listener so the driver's synthetic
//! key presses show up only while it is live.

use std::cell::Cell;
use std::rc::Rc;

use cadence_core::context::StateContext;
use cadence_core::interp::lerp;
use cadence_core::listener::{ListenerCallback, SourceId};
use cadence_core::State;
use tracing::{debug, info, trace};

/// Source id of the synthetic keyboard.
pub const KEYBOARD: SourceId = SourceId(1);

/// Event kind the play state listens for.
pub const KEYDOWN: &str = "keydown";

/// Ticks the title screen stays up.
const TITLE_TICKS: u64 = 30;

/// Ticks the pause overlay stays up.
const PAUSE_TICKS: u64 = 15;

/// Units the play state's point moves per tick.
const SPEED: f64 = 0.5;

/// Title screen.
#[derive(Debug)]
pub struct TitleState {
    entered_at: u64,
    play_ticks: u64,
    presses: Rc<Cell<u64>>,
}

impl TitleState {
    /// A title screen that hands over to a play state with the given tick
    /// budget. Key presses seen by the play state are counted in `presses`.
    pub const fn new(play_ticks: u64, presses: Rc<Cell<u64>>) -> Self {
        Self {
            entered_at: 0,
            play_ticks,
            presses,
        }
    }
}

impl State for TitleState {
    fn name(&self) -> &str {
        "title"
    }

    fn init(&mut self, ctx: &mut StateContext<'_>) {
        self.entered_at = ctx.current_tick();
        info!(tick = self.entered_at, "Title screen");
    }

    fn update(&mut self, ctx: &mut StateContext<'_>) {
        if ctx.current_tick().saturating_sub(self.entered_at) >= TITLE_TICKS {
            let play = PlayState::new(self.play_ticks, Rc::clone(&self.presses));
            ctx.change_state(Box::new(play));
        }
    }
}

/// Gameplay: a point moving at constant speed.
#[derive(Debug)]
pub struct PlayState {
    budget: u64,
    played: u64,
    paused_once: bool,
    previous: f64,
    position: f64,
    presses: Rc<Cell<u64>>,
}

impl PlayState {
    /// A play state that ends after `budget` of its own ticks.
    pub const fn new(budget: u64, presses: Rc<Cell<u64>>) -> Self {
        Self {
            budget,
            played: 0,
            paused_once: false,
            previous: 0.0,
            position: 0.0,
            presses,
        }
    }
}

impl State for PlayState {
    fn name(&self) -> &str {
        "play"
    }

    fn init(&mut self, ctx: &mut StateContext<'_>) {
        let presses = Rc::clone(&self.presses);
        ctx.register_listener(
            KEYBOARD,
            KEYDOWN,
            ListenerCallback::new(move |_| presses.set(presses.get().saturating_add(1))),
        );
        info!(tick = ctx.current_tick(), budget = self.budget, "Play started");
    }

    fn update(&mut self, ctx: &mut StateContext<'_>) {
        self.previous = self.position;
        self.position += SPEED;
        self.played = self.played.saturating_add(1);

        if !self.paused_once && self.played >= self.budget / 2 {
            self.paused_once = true;
            ctx.push_state(Box::new(PauseState::default()));
        } else if self.played >= self.budget {
            info!(tick = ctx.current_tick(), position = self.position, "Play finished");
            ctx.pop_state();
        }
    }

    fn draw(&mut self, ctx: &mut StateContext<'_>) {
        let drawn = lerp(self.previous, self.position, ctx.tick_alpha());
        trace!(tick = ctx.current_tick(), alpha = ctx.tick_alpha(), drawn, "Play drawn");
    }

    fn pause(&mut self, ctx: &mut StateContext<'_>) {
        debug!(tick = ctx.current_tick(), "Play paused");
    }

    fn resume(&mut self, ctx: &mut StateContext<'_>) {
        debug!(tick = ctx.current_tick(), "Play resumed");
    }

    fn cleanup(&mut self, ctx: &mut StateContext<'_>) {
        debug!(tick = ctx.current_tick(), presses = self.presses.get(), "Play cleaned up");
    }
}

/// Pause overlay.
#[derive(Debug, Default)]
pub struct PauseState {
    waited: u64,
}

impl State for PauseState {
    fn name(&self) -> &str {
        "pause"
    }

    fn update(&mut self, ctx: &mut StateContext<'_>) {
        self.waited = self.waited.saturating_add(1);
        if self.waited >= PAUSE_TICKS {
            ctx.pop_state();
        }
    }
}
