//! States and the state stack.
//!
//! A [`State`] is one mutually exclusive unit of game logic (menu,
//! gameplay, pause). It exposes six hooks, each a no-op unless
//! overridden. [`StateBuilder`] builds a state from closures for callers
//! that do not want a dedicated type.
//!
//! The [`StateStack`] orders states bottom to top. Only the top is
//! simulated, and only the top has wired listener bindings (unless the
//! scheduler is frozen, in which case none do).
//!
//! # Transition order
//!
//! - push: `pause` old top, unwire old top, push, `init` new top, wire it.
//! - pop: remove top, `cleanup` it, unwire it, then `resume` the new top
//!   and wire it.
//! - change: remove top, `cleanup`, unwire, push new, `init`, wire.
//!
//! Transitions requested by hooks that run during a transition are
//! collected in the [`HookEnv`] and applied by the scheduler once the
//! transition completes.

use std::fmt;

use tracing::debug;

use crate::context::{Projection, Request, StateContext, Timing};
use crate::host::EventSource;
use crate::listener::ListenerSet;

/// A unit of game logic driven by the scheduler.
///
/// Every hook defaults to doing nothing.
pub trait State {
    /// Name used in log output.
    fn name(&self) -> &str {
        "state"
    }

    /// Called once when the state enters the stack, before its listeners
    /// are wired.
    fn init(&mut self, _ctx: &mut StateContext<'_>) {}

    /// Called once when the state leaves the stack, before its listeners
    /// are unwired.
    fn cleanup(&mut self, _ctx: &mut StateContext<'_>) {}

    /// Called once per simulated tick while this state is on top.
    fn update(&mut self, _ctx: &mut StateContext<'_>) {}

    /// Called at most once per refresh while this state is on top.
    fn draw(&mut self, _ctx: &mut StateContext<'_>) {}

    /// Called when another state is pushed on top of this one.
    fn pause(&mut self, _ctx: &mut StateContext<'_>) {}

    /// Called when this state becomes the top again after a pop.
    fn resume(&mut self, _ctx: &mut StateContext<'_>) {}
}

type Hook = Box<dyn FnMut(&mut StateContext<'_>)>;

/// A state assembled from optional closures. See [`StateBuilder`].
pub struct FnState {
    name: String,
    init: Option<Hook>,
    cleanup: Option<Hook>,
    update: Option<Hook>,
    draw: Option<Hook>,
    pause: Option<Hook>,
    resume: Option<Hook>,
}

fn run(hook: &mut Option<Hook>, ctx: &mut StateContext<'_>) {
    if let Some(f) = hook.as_mut() {
        f(ctx);
    }
}

impl State for FnState {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &mut StateContext<'_>) {
        run(&mut self.init, ctx);
    }

    fn cleanup(&mut self, ctx: &mut StateContext<'_>) {
        run(&mut self.cleanup, ctx);
    }

    fn update(&mut self, ctx: &mut StateContext<'_>) {
        run(&mut self.update, ctx);
    }

    fn draw(&mut self, ctx: &mut StateContext<'_>) {
        run(&mut self.draw, ctx);
    }

    fn pause(&mut self, ctx: &mut StateContext<'_>) {
        run(&mut self.pause, ctx);
    }

    fn resume(&mut self, ctx: &mut StateContext<'_>) {
        run(&mut self.resume, ctx);
    }
}

impl fmt::Debug for FnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnState")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Builder for [`FnState`]. Hooks that are not set are no-ops.
///
/// ```
/// use cadence_core::state::StateBuilder;
///
/// let menu = StateBuilder::new("menu")
///     .on_update(|ctx| {
///         if ctx.current_tick() > 90 {
///             ctx.pop_state();
///         }
///     })
///     .build();
/// ```
pub struct StateBuilder {
    inner: FnState,
}

impl StateBuilder {
    /// Start a state with the given log name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: FnState {
                name: name.into(),
                init: None,
                cleanup: None,
                update: None,
                draw: None,
                pause: None,
                resume: None,
            },
        }
    }

    /// Set the `init` hook.
    #[must_use]
    pub fn on_init(mut self, f: impl FnMut(&mut StateContext<'_>) + 'static) -> Self {
        self.inner.init = Some(Box::new(f));
        self
    }

    /// Set the `cleanup` hook.
    #[must_use]
    pub fn on_cleanup(mut self, f: impl FnMut(&mut StateContext<'_>) + 'static) -> Self {
        self.inner.cleanup = Some(Box::new(f));
        self
    }

    /// Set the `update` hook.
    #[must_use]
    pub fn on_update(mut self, f: impl FnMut(&mut StateContext<'_>) + 'static) -> Self {
        self.inner.update = Some(Box::new(f));
        self
    }

    /// Set the `draw` hook.
    #[must_use]
    pub fn on_draw(mut self, f: impl FnMut(&mut StateContext<'_>) + 'static) -> Self {
        self.inner.draw = Some(Box::new(f));
        self
    }

    /// Set the `pause` hook.
    #[must_use]
    pub fn on_pause(mut self, f: impl FnMut(&mut StateContext<'_>) + 'static) -> Self {
        self.inner.pause = Some(Box::new(f));
        self
    }

    /// Set the `resume` hook.
    #[must_use]
    pub fn on_resume(mut self, f: impl FnMut(&mut StateContext<'_>) + 'static) -> Self {
        self.inner.resume = Some(Box::new(f));
        self
    }

    /// Finish as a boxed state ready for the stack.
    pub fn build(self) -> Box<dyn State> {
        Box::new(self.inner)
    }

    /// Finish as a concrete [`FnState`].
    pub fn into_state(self) -> FnState {
        self.inner
    }
}

impl fmt::Debug for StateBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateBuilder")
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Identity of a state instance while it is on the stack.
///
/// Ids are never reused within one stack, so comparing the top id before
/// and after a tick tells whether the top changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(u64);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

/// Which hook to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookKind {
    Init,
    Cleanup,
    Update,
    Draw,
    Pause,
    Resume,
}

/// Everything a transition needs from the scheduler.
///
/// `projection` is the view handed to the next hook; each hook's requests
/// advance it and are appended to `requests`.
pub(crate) struct HookEnv<'a> {
    pub(crate) events: &'a mut dyn EventSource,
    pub(crate) timing: Timing,
    pub(crate) projection: Projection,
    pub(crate) frozen: bool,
    pub(crate) requests: Vec<Request>,
}

struct StateEntry {
    id: StateId,
    state: Box<dyn State>,
    listeners: ListenerSet,
}

impl StateEntry {
    fn invoke(&mut self, hook: HookKind, env: &mut HookEnv<'_>) {
        let mut ctx = StateContext::new(
            &mut self.listeners,
            &mut *env.events,
            env.timing,
            env.projection,
        );
        match hook {
            HookKind::Init => self.state.init(&mut ctx),
            HookKind::Cleanup => self.state.cleanup(&mut ctx),
            HookKind::Update => self.state.update(&mut ctx),
            HookKind::Draw => self.state.draw(&mut ctx),
            HookKind::Pause => self.state.pause(&mut ctx),
            HookKind::Resume => self.state.resume(&mut ctx),
        }
        let (requests, projection) = ctx.into_parts();
        env.projection = projection;
        env.requests.extend(requests);
    }
}

/// Ordered stack of states; the last element is the top.
#[derive(Default)]
pub struct StateStack {
    entries: Vec<StateEntry>,
    next_id: u64,
}

impl StateStack {
    /// An empty stack.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Number of states on the stack.
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stack holds no states.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identity of the top state.
    pub fn top_id(&self) -> Option<StateId> {
        self.entries.last().map(|entry| entry.id)
    }

    /// Name of the top state.
    pub fn top_name(&self) -> Option<&str> {
        self.entries.last().map(|entry| entry.state.name())
    }

    /// Names from bottom to top.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.state.name()).collect()
    }

    /// Listener bindings of the top state.
    pub fn top_listeners(&self) -> Option<&ListenerSet> {
        self.entries.last().map(|entry| &entry.listeners)
    }

    /// Number of states whose listener bindings are currently wired.
    pub fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.listeners.is_active())
            .count()
    }

    fn allocate_id(&mut self) -> StateId {
        let id = StateId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    /// Run `hook` on the top state. Returns `false` if the stack is empty.
    pub(crate) fn invoke_top(&mut self, hook: HookKind, env: &mut HookEnv<'_>) -> bool {
        let Some(top) = self.entries.last_mut() else {
            return false;
        };
        top.invoke(hook, env);
        true
    }

    /// Push `state` on top, pausing the current top if there is one.
    pub(crate) fn push(&mut self, state: Box<dyn State>, env: &mut HookEnv<'_>) {
        let depth = self.entries.len();
        if let Some(top) = self.entries.last_mut() {
            top.invoke(HookKind::Pause, env);
            top.listeners.deactivate(&mut *env.events);
        }
        let entry = StateEntry {
            id: self.allocate_id(),
            state,
            listeners: ListenerSet::new(),
        };
        debug!(state = entry.state.name(), id = %entry.id, depth = depth.saturating_add(1), "State pushed");
        self.entries.push(entry);
        self.enter_top(env);
    }

    /// Pop the top state and resume the one beneath it. Returns `false` if
    /// the stack was already empty.
    pub(crate) fn pop(&mut self, env: &mut HookEnv<'_>) -> bool {
        if !self.remove_top(env) {
            return false;
        }
        if let Some(top) = self.entries.last_mut() {
            top.invoke(HookKind::Resume, env);
            if !env.frozen {
                top.listeners.activate(&mut *env.events);
            }
        }
        true
    }

    /// Replace the top state. Returns `false` (and changes nothing) if the
    /// stack is empty.
    pub(crate) fn change(&mut self, state: Box<dyn State>, env: &mut HookEnv<'_>) -> bool {
        if !self.remove_top(env) {
            return false;
        }
        let entry = StateEntry {
            id: self.allocate_id(),
            state,
            listeners: ListenerSet::new(),
        };
        debug!(state = entry.state.name(), id = %entry.id, depth = self.entries.len().saturating_add(1), "State changed");
        self.entries.push(entry);
        self.enter_top(env);
        true
    }

    /// Pop every state top to bottom, running `cleanup` and unwiring each.
    /// States beneath the top are not resumed on the way down.
    pub(crate) fn drain(&mut self, env: &mut HookEnv<'_>) {
        while self.remove_top(env) {}
    }

    /// Wire the top state's bindings.
    pub(crate) fn activate_top(&mut self, events: &mut dyn EventSource) {
        if let Some(top) = self.entries.last_mut() {
            top.listeners.activate(events);
        }
    }

    /// Unwire the top state's bindings.
    pub(crate) fn deactivate_top(&mut self, events: &mut dyn EventSource) {
        if let Some(top) = self.entries.last_mut() {
            top.listeners.deactivate(events);
        }
    }

    fn enter_top(&mut self, env: &mut HookEnv<'_>) {
        if let Some(top) = self.entries.last_mut() {
            top.invoke(HookKind::Init, env);
            if !env.frozen {
                top.listeners.activate(&mut *env.events);
            }
        }
    }

    fn remove_top(&mut self, env: &mut HookEnv<'_>) -> bool {
        let Some(mut entry) = self.entries.pop() else {
            return false;
        };
        debug!(state = entry.state.name(), id = %entry.id, depth = self.entries.len(), "State popped");
        entry.invoke(HookKind::Cleanup, env);
        entry.listeners.deactivate(&mut *env.events);
        true
    }
}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStack")
            .field("states", &self.names())
            .field("next_id", &self.next_id)
            .finish()
    }
}
