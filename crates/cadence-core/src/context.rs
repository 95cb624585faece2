//! The handle a state hook receives while it runs.
//!
//! A hook cannot touch the stack directly: the stack is busy running it.
//! Instead it records transition requests on its [`StateContext`]. The
//! scheduler queues them and applies the queue in order once the
//! transition or tick that ran the hook has completed, which is before the
//! next tick of the same refresh. Requests made by hooks that run while
//! the queue is being applied join the back of the queue.
//!
//! A hook sees the stack as it will be once everything already queued has
//! been applied, and each request method answers against that view,
//! counting the hook's own earlier requests. Because requests are applied
//! in the same order they were checked, the answer is always what actually
//! happens. A hook that pops the last state and then tries to push gets
//! `false` for the push, exactly as a caller outside the loop would.
//!
//! Listener registration is not deferred: it goes straight to the
//! [`ListenerSet`] of the state that owns the hook, and is wired at once if
//! that state is live.

use std::fmt;

use crate::host::EventSource;
use crate::listener::{EventKind, ListenerBinding, ListenerCallback, ListenerSet, SourceId};
use crate::state::State;

/// A transition recorded by a hook, applied when the hook returns.
pub(crate) enum Request {
    Push(Box<dyn State>),
    Pop,
    Change(Box<dyn State>),
    Stop,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push(state) => write!(f, "Push({})", state.name()),
            Self::Pop => f.write_str("Pop"),
            Self::Change(state) => write!(f, "Change({})", state.name()),
            Self::Stop => f.write_str("Stop"),
        }
    }
}

/// Stack depth and running flag once every queued request is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Projection {
    pub(crate) depth: usize,
    pub(crate) running: bool,
}

impl Projection {
    /// A running loop with `depth` states.
    pub(crate) const fn running(depth: usize) -> Self {
        Self {
            depth,
            running: true,
        }
    }

    /// Account for a push. Returns `false` if it would be refused.
    pub(crate) const fn push(&mut self) -> bool {
        if !self.running || self.depth == 0 {
            return false;
        }
        self.depth = self.depth.saturating_add(1);
        true
    }

    /// Account for a pop; popping the last state stops the loop.
    pub(crate) const fn pop(&mut self) -> bool {
        if !self.running || self.depth == 0 {
            return false;
        }
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.running = false;
        }
        true
    }

    /// Account for a change, which keeps the depth.
    pub(crate) const fn change(&self) -> bool {
        self.running && self.depth > 0
    }

    /// Account for a stop.
    pub(crate) const fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        self.depth = 0;
        true
    }
}

/// Scheduler timing captured just before a hook is invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timing {
    /// Simulated milliseconds since `start()`, excluding frozen time.
    pub game_time_ms: f64,
    /// Ticks simulated since `start()`.
    pub current_tick: u64,
    /// Fraction of the way into the tick after `current_tick`.
    pub tick_alpha: f64,
}

/// What a hook can see and do.
pub struct StateContext<'a> {
    listeners: &'a mut ListenerSet,
    events: &'a mut dyn EventSource,
    timing: Timing,
    projection: Projection,
    requests: Vec<Request>,
}

impl<'a> StateContext<'a> {
    pub(crate) fn new(
        listeners: &'a mut ListenerSet,
        events: &'a mut dyn EventSource,
        timing: Timing,
        projection: Projection,
    ) -> Self {
        Self {
            listeners,
            events,
            timing,
            projection,
            requests: Vec::new(),
        }
    }

    /// The recorded requests and the view they leave behind.
    pub(crate) fn into_parts(self) -> (Vec<Request>, Projection) {
        (self.requests, self.projection)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Suspend the current top and make `state` the new top.
    ///
    /// Returns `false` if the stack is empty or the loop is stopping.
    pub fn push_state(&mut self, state: Box<dyn State>) -> bool {
        if !self.projection.push() {
            return false;
        }
        self.requests.push(Request::Push(state));
        true
    }

    /// Remove the top state. Popping the last state stops the loop.
    ///
    /// Returns `false` if the stack is already empty.
    pub fn pop_state(&mut self) -> bool {
        if !self.projection.pop() {
            return false;
        }
        self.requests.push(Request::Pop);
        true
    }

    /// Replace the top state with `state`, keeping the depth.
    ///
    /// Returns `false` if the stack is empty.
    pub fn change_state(&mut self, state: Box<dyn State>) -> bool {
        if !self.projection.change() {
            return false;
        }
        self.requests.push(Request::Change(state));
        true
    }

    /// Stop the loop. The rest of this refresh is abandoned and nothing
    /// is drawn.
    ///
    /// Returns `false` if the loop is already stopping.
    pub fn stop(&mut self) -> bool {
        if !self.projection.stop() {
            return false;
        }
        self.requests.push(Request::Stop);
        true
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    /// Bind `callback` to `kind` events from `source` for as long as this
    /// state is live. Takes effect immediately if it is live now.
    pub fn register_listener(
        &mut self,
        source: SourceId,
        kind: impl Into<EventKind>,
        callback: ListenerCallback,
    ) {
        let binding = ListenerBinding::new(source, kind.into(), callback);
        self.listeners.register(binding, &mut *self.events);
    }

    /// Drop this state's bindings on `source`/`kind`; only those with the
    /// given callback if one is passed. Returns how many were removed.
    pub fn deregister_listener(
        &mut self,
        source: SourceId,
        kind: impl Into<EventKind>,
        callback: Option<&ListenerCallback>,
    ) -> usize {
        let kind = kind.into();
        self.listeners
            .deregister(source, &kind, callback, &mut *self.events)
    }

    /// This state's bindings.
    pub fn listeners(&self) -> &ListenerSet {
        self.listeners
    }

    // -----------------------------------------------------------------------
    // Timing
    // -----------------------------------------------------------------------

    /// Simulated milliseconds since `start()`, excluding frozen time.
    pub const fn game_time(&self) -> f64 {
        self.timing.game_time_ms
    }

    /// Ticks simulated since `start()`. During `update` this is the number
    /// of the tick being simulated.
    pub const fn current_tick(&self) -> u64 {
        self.timing.current_tick
    }

    /// Interpolation fraction between `current_tick` and the next tick.
    /// Only meaningful inside `draw`.
    pub const fn tick_alpha(&self) -> f64 {
        self.timing.tick_alpha
    }

    /// Full timing snapshot.
    pub const fn timing(&self) -> Timing {
        self.timing
    }

    /// Stack depth as this hook sees it: after every queued request,
    /// including its own, has been applied.
    pub const fn depth(&self) -> usize {
        self.projection.depth
    }

    /// Whether the loop will still be running once every queued request,
    /// including this hook's own, has been applied.
    pub const fn is_running(&self) -> bool {
        self.projection.running
    }
}

impl fmt::Debug for StateContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateContext")
            .field("timing", &self.timing)
            .field("projection", &self.projection)
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}
