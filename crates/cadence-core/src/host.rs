//! Collaborator contracts between the scheduler and its host environment.
//!
//! The scheduler never reaches for ambient globals. Everything it needs
//! from the outside world is injected at construction through these
//! traits:
//!
//! - [`Clock`] -- monotonic milliseconds, arbitrary epoch.
//! - [`RefreshHost`] -- starts and stops the once-per-refresh callback.
//! - [`VisibilitySource`] -- synchronous hidden/visible query.
//! - [`EventSource`] -- wires listener bindings to real event delivery.
//!
//! Each trait ships with an in-memory implementation. The `Manual*` types
//! hand out shared handles so a test (or a driver) can steer them after the
//! scheduler has taken ownership.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use crate::listener::ListenerBinding;

/// A monotonic millisecond clock.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch. Never decreases.
    fn now_ms(&self) -> f64;
}

/// Wall clock backed by [`Instant`]; the epoch is the moment of construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    /// Create a clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test keeps one handle and
/// gives another to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    /// Create a clock reading 0 ms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to an absolute time. Values earlier than the current reading
    /// are ignored so the clock stays monotonic.
    pub fn set(&self, ms: f64) {
        if ms > self.now.get() {
            self.now.set(ms);
        }
    }

    /// Move forward by `ms` milliseconds. Negative deltas are ignored.
    pub fn advance(&self, ms: f64) {
        if ms > 0.0 {
            self.now.set(self.now.get() + ms);
        }
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

/// The display-refresh source that drives the scheduler.
///
/// While a loop is requested the host calls
/// [`Scheduler::frame`](crate::scheduler::Scheduler::frame) once per display
/// refresh. The scheduler requests the loop once per `start()` and cancels
/// it once per `stop()`.
pub trait RefreshHost {
    /// Begin delivering one refresh callback per display refresh.
    fn request_loop(&mut self);

    /// Stop delivering refresh callbacks.
    fn cancel_loop(&mut self);
}

/// A refresh host that only records whether the loop is requested.
///
/// The actual driver (a timer task, a test loop) polls the [`LoopHandle`]
/// and calls `frame()` while it reports looping.
#[derive(Debug, Default)]
pub struct LoopFlagHost {
    state: Rc<LoopState>,
}

#[derive(Debug, Default)]
struct LoopState {
    looping: Cell<bool>,
    requests: Cell<u32>,
    cancels: Cell<u32>,
}

impl LoopFlagHost {
    /// Create a host with no loop requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// A shared read handle for the driver.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            state: Rc::clone(&self.state),
        }
    }
}

impl RefreshHost for LoopFlagHost {
    fn request_loop(&mut self) {
        self.state.looping.set(true);
        self.state
            .requests
            .set(self.state.requests.get().saturating_add(1));
    }

    fn cancel_loop(&mut self) {
        self.state.looping.set(false);
        self.state
            .cancels
            .set(self.state.cancels.get().saturating_add(1));
    }
}

/// Read side of a [`LoopFlagHost`].
#[derive(Debug, Clone)]
pub struct LoopHandle {
    state: Rc<LoopState>,
}

impl LoopHandle {
    /// Whether the scheduler currently wants refresh callbacks.
    pub fn is_looping(&self) -> bool {
        self.state.looping.get()
    }

    /// How many times the loop has been requested.
    pub fn requests(&self) -> u32 {
        self.state.requests.get()
    }

    /// How many times the loop has been cancelled.
    pub fn cancels(&self) -> u32 {
        self.state.cancels.get()
    }
}

/// Host page visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// The page is on screen.
    Visible,
    /// The page is in a background tab or minimized.
    Hidden,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Visible => f.write_str("visible"),
            Self::Hidden => f.write_str("hidden"),
        }
    }
}

/// Synchronous visibility query.
///
/// Transitions are pushed into the scheduler with
/// [`Scheduler::set_visibility`](crate::scheduler::Scheduler::set_visibility);
/// this trait only answers "what is it right now".
pub trait VisibilitySource {
    /// Current visibility of the host page.
    fn visibility(&self) -> Visibility;

    /// Shorthand for `visibility() == Visibility::Hidden`.
    fn is_hidden(&self) -> bool {
        self.visibility() == Visibility::Hidden
    }
}

/// A host that is never hidden.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

impl VisibilitySource for AlwaysVisible {
    fn visibility(&self) -> Visibility {
        Visibility::Visible
    }
}

/// Visibility that a test flips by hand. Clones share state.
#[derive(Debug, Clone)]
pub struct ManualVisibility {
    current: Rc<Cell<Visibility>>,
}

impl ManualVisibility {
    /// Start in the given visibility.
    pub fn new(initial: Visibility) -> Self {
        Self {
            current: Rc::new(Cell::new(initial)),
        }
    }

    /// Change the reported visibility.
    pub fn set(&self, visibility: Visibility) {
        self.current.set(visibility);
    }
}

impl Default for ManualVisibility {
    fn default() -> Self {
        Self::new(Visibility::Visible)
    }
}

impl VisibilitySource for ManualVisibility {
    fn visibility(&self) -> Visibility {
        self.current.get()
    }
}

/// The environment's event system.
///
/// Bindings are compared by identity: source, kind, and callback pointer.
/// Adding the same binding twice produces two independent registrations;
/// removing it once removes one.
pub trait EventSource {
    /// Wire a binding so matching events reach its callback.
    fn add_binding(&mut self, binding: &ListenerBinding);

    /// Unwire one registration of a binding.
    fn remove_binding(&mut self, binding: &ListenerBinding);
}

/// Everything the scheduler needs from its environment.
pub struct Collaborators {
    /// Monotonic time source.
    pub clock: Box<dyn Clock>,
    /// Display-refresh driver.
    pub host: Box<dyn RefreshHost>,
    /// Page visibility query.
    pub visibility: Box<dyn VisibilitySource>,
    /// Event wiring for listener bindings.
    pub events: Box<dyn EventSource>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
