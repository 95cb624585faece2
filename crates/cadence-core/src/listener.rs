//! Listener bindings owned by states.
//!
//! A state owns a [`ListenerSet`]: the (source, kind, callback) triples it
//! wants wired while it is the live top of the stack. Wiring happens only
//! at defined points (state transitions, freeze and unfreeze) through
//! [`ListenerSet::activate`] and [`ListenerSet::deactivate`]. The one
//! exception is registering on a set that is already active, which wires
//! the new binding immediately.
//!
//! [`BindingRegistry`] is an in-memory [`EventSource`] that records live
//! bindings and dispatches events to them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::host::EventSource;

/// Opaque identifier of an event-emitting object (a canvas, the window).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Event kind name, e.g. `"keydown"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKind(String);

impl EventKind {
    /// Wrap a kind name.
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// The kind name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event delivered to listener callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Where the event came from.
    pub source: SourceId,
    /// What kind of event it is.
    pub kind: EventKind,
    /// Free-form payload.
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl Event {
    /// An event with no payload.
    pub const fn new(source: SourceId, kind: EventKind) -> Self {
        Self {
            source,
            kind,
            detail: None,
        }
    }
}

/// A listener callback, compared by pointer identity.
///
/// Two `ListenerCallback`s are equal only if they are clones of the same
/// allocation, mirroring how the host environment identifies handlers.
#[derive(Clone)]
pub struct ListenerCallback(Rc<dyn Fn(&Event)>);

impl ListenerCallback {
    /// Wrap a closure.
    pub fn new(f: impl Fn(&Event) + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke the callback.
    pub fn call(&self, event: &Event) {
        (self.0)(event);
    }
}

impl PartialEq for ListenerCallback {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl Eq for ListenerCallback {}

impl fmt::Debug for ListenerCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerCallback({:p})", Rc::as_ptr(&self.0).cast::<()>())
    }
}

/// One (source, kind, callback) registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerBinding {
    /// Event source the callback listens on.
    pub source: SourceId,
    /// Event kind the callback listens for.
    pub kind: EventKind,
    /// The handler.
    pub callback: ListenerCallback,
}

impl ListenerBinding {
    /// Build a binding.
    pub const fn new(source: SourceId, kind: EventKind, callback: ListenerCallback) -> Self {
        Self {
            source,
            kind,
            callback,
        }
    }

    /// Whether this binding listens for `event`.
    pub fn matches(&self, event: &Event) -> bool {
        self.source == event.source && self.kind == event.kind
    }

    fn selected_by(
        &self,
        source: SourceId,
        kind: &EventKind,
        callback: Option<&ListenerCallback>,
    ) -> bool {
        self.source == source
            && self.kind == *kind
            && callback.is_none_or(|cb| self.callback == *cb)
    }
}

/// The bindings one state owns, and whether they are currently wired.
#[derive(Debug, Default)]
pub struct ListenerSet {
    bindings: Vec<ListenerBinding>,
    active: bool,
}

impl ListenerSet {
    /// An empty, inactive set.
    pub const fn new() -> Self {
        Self {
            bindings: Vec::new(),
            active: false,
        }
    }

    /// Add a binding. Duplicates are kept and tracked independently.
    ///
    /// If the set is active the binding is wired immediately.
    pub fn register(&mut self, binding: ListenerBinding, events: &mut dyn EventSource) {
        if self.active {
            events.add_binding(&binding);
        }
        self.bindings.push(binding);
    }

    /// Remove bindings on `source`/`kind`.
    ///
    /// With `Some(callback)` only bindings with that exact callback are
    /// removed; with `None` every binding on `source`/`kind` goes. Removed
    /// bindings are unwired if the set is active. Returns how many were
    /// removed.
    pub fn deregister(
        &mut self,
        source: SourceId,
        kind: &EventKind,
        callback: Option<&ListenerCallback>,
        events: &mut dyn EventSource,
    ) -> usize {
        let before = self.bindings.len();
        let active = self.active;
        self.bindings.retain(|binding| {
            if binding.selected_by(source, kind, callback) {
                if active {
                    events.remove_binding(binding);
                }
                false
            } else {
                true
            }
        });
        before.saturating_sub(self.bindings.len())
    }

    /// Wire every binding. No-op if already active.
    pub fn activate(&mut self, events: &mut dyn EventSource) {
        if self.active {
            return;
        }
        for binding in &self.bindings {
            events.add_binding(binding);
        }
        self.active = true;
    }

    /// Unwire every binding. No-op if already inactive.
    pub fn deactivate(&mut self, events: &mut dyn EventSource) {
        if !self.active {
            return;
        }
        for binding in &self.bindings {
            events.remove_binding(binding);
        }
        self.active = false;
    }

    /// Whether the bindings are currently wired.
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Number of owned bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the set owns no bindings.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Owned bindings in registration order.
    pub fn bindings(&self) -> &[ListenerBinding] {
        &self.bindings
    }
}

/// In-memory event source.
///
/// Clones share the same registry, so a driver keeps one handle to
/// dispatch events while the scheduler owns another for wiring.
#[derive(Debug, Clone, Default)]
pub struct BindingRegistry {
    live: Rc<RefCell<Vec<ListenerBinding>>>,
}

impl BindingRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every live binding that matches it. Returns the
    /// number of callbacks invoked.
    pub fn dispatch(&self, event: &Event) -> usize {
        // Collect first so callbacks run without the registry borrowed.
        let targets: Vec<ListenerCallback> = self
            .live
            .borrow()
            .iter()
            .filter(|binding| binding.matches(event))
            .map(|binding| binding.callback.clone())
            .collect();
        for callback in &targets {
            callback.call(event);
        }
        targets.len()
    }

    /// Number of live registrations.
    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    /// Number of live registrations on `source`/`kind`.
    pub fn count_for(&self, source: SourceId, kind: &EventKind) -> usize {
        self.live
            .borrow()
            .iter()
            .filter(|binding| binding.source == source && binding.kind == *kind)
            .count()
    }
}

impl EventSource for BindingRegistry {
    fn add_binding(&mut self, binding: &ListenerBinding) {
        trace!(source = %binding.source, kind = %binding.kind, "Binding wired");
        self.live.borrow_mut().push(binding.clone());
    }

    fn remove_binding(&mut self, binding: &ListenerBinding) {
        let mut live = self.live.borrow_mut();
        if let Some(pos) = live.iter().position(|b| b == binding) {
            live.remove(pos);
            trace!(source = %binding.source, kind = %binding.kind, "Binding unwired");
        }
    }
}
