//! Fixed-timestep game-loop scheduler and state stack.
//!
//! This crate advances a simulation at a fixed logical tick rate,
//! decoupled from the display refresh rate, and organizes game logic into
//! a stack of mutually exclusive states (menu, gameplay, pause).
//!
//! # Modules
//!
//! - [`scheduler`] -- the per-refresh tick/draw cycle, catch-up choke,
//!   freeze handling, and interpolation alpha.
//! - [`state`] -- the [`State`] hooks, [`StateBuilder`], and the
//!   [`StateStack`] transition protocol.
//! - [`context`] -- [`StateContext`], what a hook can see and request.
//! - [`listener`] -- per-state listener bindings and the in-memory
//!   [`BindingRegistry`] event source.
//! - [`host`] -- collaborator traits (clock, refresh host, visibility,
//!   event source) and their in-memory implementations.
//! - [`config`] -- configuration loading from `cadence.yaml`.
//! - [`interp`] -- render-side interpolation.
//!
//! [`State`]: state::State
//! [`StateBuilder`]: state::StateBuilder
//! [`StateStack`]: state::StateStack
//! [`StateContext`]: context::StateContext
//! [`BindingRegistry`]: listener::BindingRegistry

pub mod config;
pub mod context;
pub mod host;
pub mod interp;
pub mod listener;
pub mod scheduler;
pub mod state;

pub use interp::lerp;
pub use scheduler::{FrameReport, LoopStats, Scheduler};
pub use state::{State, StateBuilder};
