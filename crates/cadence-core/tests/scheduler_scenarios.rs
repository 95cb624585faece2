//! End-to-end scenarios for the scheduler and state stack.
//!
//! Every test drives a real [`Scheduler`] through in-memory collaborators:
//! a [`ManualClock`] for time, a [`LoopFlagHost`] standing in for the
//! display, and an event source that writes wiring changes into the same
//! log the states write their hooks into, so ordering between hooks and
//! listener wiring is observable.

#![allow(clippy::unwrap_used)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cadence_core::config::SchedulerConfig;
use cadence_core::context::StateContext;
use cadence_core::host::{
    Collaborators, EventSource, LoopFlagHost, LoopHandle, ManualClock, ManualVisibility, Visibility,
};
use cadence_core::listener::{
    BindingRegistry, Event, ListenerBinding, ListenerCallback, SourceId,
};
use cadence_core::{lerp, Scheduler, State, StateBuilder};

type Log = Rc<RefCell<Vec<String>>>;

const KEYBOARD: SourceId = SourceId(1);

/// Event source that logs wiring and forwards to a registry.
struct RecordingEvents {
    log: Log,
    registry: BindingRegistry,
}

impl EventSource for RecordingEvents {
    fn add_binding(&mut self, binding: &ListenerBinding) {
        self.log.borrow_mut().push(format!("wire {}", binding.kind));
        self.registry.add_binding(binding);
    }

    fn remove_binding(&mut self, binding: &ListenerBinding) {
        self.log.borrow_mut().push(format!("unwire {}", binding.kind));
        self.registry.remove_binding(binding);
    }
}

struct Harness {
    scheduler: Scheduler,
    clock: ManualClock,
    visibility: ManualVisibility,
    registry: BindingRegistry,
    host: LoopHandle,
    log: Log,
}

fn harness(config: SchedulerConfig) -> Harness {
    let log = Log::default();
    let clock = ManualClock::new();
    let visibility = ManualVisibility::default();
    let registry = BindingRegistry::new();
    let host = LoopFlagHost::new();
    let handle = host.handle();
    let scheduler = Scheduler::new(
        config,
        Collaborators {
            clock: Box::new(clock.clone()),
            host: Box::new(host),
            visibility: Box::new(visibility.clone()),
            events: Box::new(RecordingEvents {
                log: Rc::clone(&log),
                registry: registry.clone(),
            }),
        },
    )
    .unwrap();
    Harness {
        scheduler,
        clock,
        visibility,
        registry,
        host: handle,
        log,
    }
}

/// A state that logs each hook as `name.hook` and, in `init`, binds one
/// listener whose event kind is its own name.
fn recording(name: &'static str, log: &Log) -> StateBuilder {
    let hook = |label: &'static str| logger(name, label, log);
    let init_log = Rc::clone(log);
    StateBuilder::new(name)
        .on_init(move |ctx| {
            init_log.borrow_mut().push(format!("{name}.init"));
            ctx.register_listener(KEYBOARD, name, ListenerCallback::new(|_| {}));
        })
        .on_cleanup(hook("cleanup"))
        .on_pause(hook("pause"))
        .on_resume(hook("resume"))
}

fn logger(
    name: &'static str,
    label: &'static str,
    log: &Log,
) -> impl FnMut(&mut StateContext<'_>) + 'static {
    let log = Rc::clone(log);
    move |_| log.borrow_mut().push(format!("{name}.{label}"))
}

fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

// ---------------------------------------------------------------------------
// Scheduler lifecycle
// ---------------------------------------------------------------------------

#[test]
fn stop_twice_reports_true_then_false() {
    let mut h = harness(SchedulerConfig::default());
    assert!(h.scheduler.start(StateBuilder::new("a").build()));
    assert!(h.scheduler.stop());
    assert!(!h.scheduler.stop());
    assert!(!h.scheduler.is_running());
}

#[test]
fn start_while_running_keeps_tick_count() {
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(StateBuilder::new("a").build());
    h.clock.set(500.0);
    h.scheduler.frame();
    assert_eq!(h.scheduler.current_tick(), 15);

    assert!(!h.scheduler.start(StateBuilder::new("b").build()));
    assert_eq!(h.scheduler.current_tick(), 15);
    assert_eq!(h.scheduler.stack().names(), ["a"]);
}

#[test]
fn stop_cleans_up_every_state_top_to_bottom() {
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(recording("a", &h.log).build());
    h.scheduler.push_state(recording("b", &h.log).build());
    h.scheduler.push_state(recording("c", &h.log).build());
    h.log.borrow_mut().clear();

    assert!(h.scheduler.stop());
    assert_eq!(
        entries(&h.log),
        ["c.cleanup", "unwire c", "b.cleanup", "a.cleanup"]
    );
    assert_eq!(h.scheduler.depth(), 0);
    assert_eq!(h.registry.live_count(), 0);
    assert!(!h.host.is_looping());
}

// ---------------------------------------------------------------------------
// Tick scheduling
// ---------------------------------------------------------------------------

#[test]
fn long_gap_clamps_to_choke() {
    let mut h = harness(SchedulerConfig {
        target_ticks_per_second: 30,
        tick_choke: 50,
        freeze_on_blur: true,
    });
    h.scheduler.start(StateBuilder::new("a").build());
    h.clock.set(2000.0);
    let report = h.scheduler.frame();

    assert_eq!(h.scheduler.current_tick(), 50);
    assert_eq!(report.ticks_run, 50);
    assert!(report.choked);
}

#[test]
fn tick_count_tracks_wall_clock_within_choke_budget() {
    let config = SchedulerConfig {
        target_ticks_per_second: 20,
        tick_choke: 4,
        freeze_on_blur: true,
    };
    let mut h = harness(config);
    h.scheduler.start(StateBuilder::new("a").build());

    // Refresh times in ms; 50ms per tick at 20 tps.
    let schedule = [16.0, 50.0, 100.0, 400.0, 410.0, 420.0, 1000.0, 1000.0, 1000.0];
    let mut expected: u64 = 0;
    for at in schedule {
        h.clock.set(at);
        let report = h.scheduler.frame();

        let target = (at * 20.0 / 1000.0_f64).ceil();
        let mut due = 0_u64;
        while due < 4 && f64::from(u32::try_from(expected + due).unwrap()) < target {
            due += 1;
        }
        expected += due;

        assert_eq!(h.scheduler.current_tick(), expected, "at {at}ms");
        assert!(report.ticks_run <= 4);
    }
    // 1000ms = 20 ticks, reached after the choke-limited refreshes.
    assert_eq!(expected, 20);
}

#[test]
fn no_tick_is_simulated_twice() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(
        StateBuilder::new("a")
            .on_update(move |ctx| sink.borrow_mut().push(ctx.current_tick()))
            .build(),
    );
    for at in [10.0, 40.0, 40.0, 95.0, 300.0] {
        h.clock.set(at);
        h.scheduler.frame();
    }
    let ticks = seen.borrow();
    let expected: Vec<u64> = (1..=9).collect();
    assert_eq!(*ticks, expected);
}

#[test]
fn updates_precede_the_single_draw() {
    let mut h = harness(SchedulerConfig::default());
    let log = Rc::clone(&h.log);
    let draw_log = Rc::clone(&h.log);
    h.scheduler.start(
        StateBuilder::new("a")
            .on_update(move |ctx| log.borrow_mut().push(format!("update {}", ctx.current_tick())))
            .on_draw(move |_| draw_log.borrow_mut().push("draw".to_owned()))
            .build(),
    );
    h.log.borrow_mut().clear();

    h.clock.set(100.0);
    h.scheduler.frame();
    assert_eq!(entries(&h.log), ["update 1", "update 2", "update 3", "draw"]);
}

#[test]
fn alpha_interpolates_rendered_position() {
    let drawn = Rc::new(Cell::new(f64::NAN));
    let sink = Rc::clone(&drawn);
    let mut h = harness(SchedulerConfig {
        target_ticks_per_second: 10,
        ..SchedulerConfig::default()
    });
    // Position moves 1 unit per tick; draw blends previous and current.
    h.scheduler.start(
        StateBuilder::new("mover")
            .on_draw(move |ctx| {
                let current = f64::from(u32::try_from(ctx.current_tick()).unwrap());
                sink.set(lerp(current - 1.0, current, ctx.tick_alpha()));
            })
            .build(),
    );

    h.clock.set(325.0);
    h.scheduler.frame();
    // 3.25 ticks of game time: tick 4 simulated, alpha 0.25.
    assert_eq!(h.scheduler.current_tick(), 4);
    assert!((drawn.get() - 3.25).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Freeze
// ---------------------------------------------------------------------------

#[test]
fn hidden_interval_is_excluded_from_game_time() {
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(StateBuilder::new("a").build());
    h.clock.set(1000.0);
    h.scheduler.frame();
    let at_hide = h.scheduler.game_time();

    h.visibility.set(Visibility::Hidden);
    h.scheduler.set_visibility(Visibility::Hidden);
    h.clock.advance(60_000.0);
    h.visibility.set(Visibility::Visible);
    h.scheduler.set_visibility(Visibility::Visible);

    assert!((h.scheduler.game_time() - at_hide).abs() < 1e-6);
    // No catch-up burst after returning.
    assert_eq!(h.scheduler.frame().ticks_run, 0);
}

#[test]
fn frozen_state_receives_no_events() {
    let hits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&hits);
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(
        StateBuilder::new("a")
            .on_init(move |ctx| {
                let counter = Rc::clone(&counter);
                ctx.register_listener(
                    KEYBOARD,
                    "keydown",
                    ListenerCallback::new(move |_| counter.set(counter.get() + 1)),
                );
            })
            .build(),
    );
    let keydown = Event::new(KEYBOARD, "keydown".into());

    assert_eq!(h.registry.dispatch(&keydown), 1);
    h.scheduler.set_visibility(Visibility::Hidden);
    assert_eq!(h.registry.dispatch(&keydown), 0);
    h.scheduler.set_visibility(Visibility::Visible);
    assert_eq!(h.registry.dispatch(&keydown), 1);
    assert_eq!(hits.get(), 2);
}

// ---------------------------------------------------------------------------
// State stack
// ---------------------------------------------------------------------------

#[test]
fn push_then_pop_orders_hooks_and_wiring() {
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(recording("a", &h.log).build());
    assert_eq!(entries(&h.log), ["a.init", "wire a"]);
    h.log.borrow_mut().clear();

    assert!(h.scheduler.push_state(recording("b", &h.log).build()));
    assert_eq!(entries(&h.log), ["a.pause", "unwire a", "b.init", "wire b"]);
    h.log.borrow_mut().clear();

    assert!(h.scheduler.pop_state());
    assert_eq!(
        entries(&h.log),
        ["b.cleanup", "unwire b", "a.resume", "wire a"]
    );
    assert_eq!(h.scheduler.depth(), 1);
    assert!(h.scheduler.is_running());
}

#[test]
fn popping_last_state_stops_the_loop() {
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(recording("a", &h.log).build());

    assert!(h.scheduler.pop_state());
    assert!(!h.scheduler.is_running());
    assert_eq!(h.scheduler.depth(), 0);
    assert!(!h.host.is_looping());
    assert!(!h.scheduler.pop_state());
}

#[test]
fn change_on_single_state_keeps_depth() {
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(recording("a", &h.log).build());
    h.log.borrow_mut().clear();

    assert!(h.scheduler.change_state(recording("b", &h.log).build()));
    assert_eq!(
        entries(&h.log),
        ["a.cleanup", "unwire a", "b.init", "wire b"]
    );
    assert_eq!(h.scheduler.depth(), 1);
    assert_eq!(h.scheduler.stack().top_name(), Some("b"));
}

#[test]
fn transitions_without_a_current_state_fail() {
    let mut h = harness(SchedulerConfig::default());
    assert!(!h.scheduler.push_state(StateBuilder::new("a").build()));
    assert!(!h.scheduler.change_state(StateBuilder::new("a").build()));
    assert!(!h.scheduler.pop_state());
    assert!(!h.scheduler.is_running());
}

#[test]
fn pause_state_pushed_and_popped_from_hooks() {
    let mut h = harness(SchedulerConfig::default());
    let log = Rc::clone(&h.log);

    let pause_log = Rc::clone(&h.log);
    let pause: Box<dyn State> = StateBuilder::new("pause")
        .on_update(move |ctx| {
            pause_log.borrow_mut().push(format!("pause.update {}", ctx.current_tick()));
            assert!(ctx.pop_state());
        })
        .build();
    let pending = RefCell::new(Some(pause));

    h.scheduler.start(
        recording("play", &h.log)
            .on_update(move |ctx| {
                log.borrow_mut().push(format!("play.update {}", ctx.current_tick()));
                if let Some(pause) = pending.borrow_mut().take() {
                    assert!(ctx.push_state(pause));
                }
            })
            .build(),
    );
    h.log.borrow_mut().clear();

    h.clock.set(100.0);
    let report = h.scheduler.frame();
    assert_eq!(report.ticks_run, 3);
    // The refresh ends on the same "play" instance it started with.
    assert!(report.drew);
    assert_eq!(
        entries(&h.log),
        [
            "play.update 1",
            "play.pause",
            "unwire play",
            "pause.update 2",
            "play.resume",
            "wire play",
            "play.update 3",
        ]
    );
}

/// What a hook's context answered: (request accepted, running, depth).
type Answer = Rc<Cell<Option<(bool, bool, usize)>>>;

#[test]
fn pop_requested_from_pause_runs_after_the_push() {
    let mut h = harness(SchedulerConfig::default());
    let answer = Answer::default();
    let sink = Rc::clone(&answer);
    h.scheduler.start(
        recording("a", &h.log)
            .on_pause(move |ctx| sink.set(Some((ctx.pop_state(), ctx.is_running(), ctx.depth()))))
            .build(),
    );
    h.log.borrow_mut().clear();

    assert!(h.scheduler.push_state(recording("b", &h.log).build()));
    // The pop lands on "b" once the push completes.
    assert_eq!(answer.get(), Some((true, true, 1)));
    assert!(h.scheduler.is_running());
    assert_eq!(h.scheduler.stack().names(), ["a"]);
    assert_eq!(
        entries(&h.log),
        [
            "unwire a",
            "b.init",
            "wire b",
            "b.cleanup",
            "unwire b",
            "a.resume",
            "wire a",
        ]
    );
}

#[test]
fn change_requested_from_init_replaces_the_new_state() {
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(recording("a", &h.log).build());

    let answer = Answer::default();
    let sink = Rc::clone(&answer);
    let replacement = RefCell::new(Some(recording("c", &h.log).build()));
    let b = recording("b", &h.log)
        .on_init(move |ctx| {
            if let Some(c) = replacement.borrow_mut().take() {
                sink.set(Some((ctx.change_state(c), ctx.is_running(), ctx.depth())));
            }
        })
        .build();

    assert!(h.scheduler.push_state(b));
    assert_eq!(answer.get(), Some((true, true, 2)));
    assert_eq!(h.scheduler.stack().names(), ["a", "c"]);
    assert_eq!(h.registry.live_count(), 1);
    assert_eq!(h.registry.count_for(KEYBOARD, &"c".into()), 1);
}

#[test]
fn pop_requested_from_initial_init_stops_the_loop() {
    let mut h = harness(SchedulerConfig::default());
    let answer = Answer::default();
    let sink = Rc::clone(&answer);
    assert!(h.scheduler.start(
        StateBuilder::new("gone")
            .on_init(move |ctx| sink.set(Some((ctx.pop_state(), ctx.is_running(), ctx.depth()))))
            .build(),
    ));

    assert_eq!(answer.get(), Some((true, false, 0)));
    assert!(!h.scheduler.is_running());
    assert_eq!(h.scheduler.depth(), 0);
    assert!(!h.host.is_looping());
}

#[test]
fn push_requested_from_cleanup_lands_on_the_resumed_state() {
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(recording("a", &h.log).build());

    let answer = Answer::default();
    let sink = Rc::clone(&answer);
    let follow_up = RefCell::new(Some(recording("c", &h.log).build()));
    h.scheduler.push_state(
        recording("b", &h.log)
            .on_cleanup(move |ctx| {
                if let Some(c) = follow_up.borrow_mut().take() {
                    sink.set(Some((ctx.push_state(c), ctx.is_running(), ctx.depth())));
                }
            })
            .build(),
    );
    h.log.borrow_mut().clear();

    assert!(h.scheduler.pop_state());
    assert_eq!(answer.get(), Some((true, true, 2)));
    assert_eq!(h.scheduler.stack().names(), ["a", "c"]);
    assert_eq!(
        entries(&h.log),
        [
            "unwire b",
            "a.resume",
            "wire a",
            "a.pause",
            "unwire a",
            "c.init",
            "wire c",
        ]
    );
}

#[test]
fn cleanup_of_the_last_state_cannot_queue_transitions() {
    let mut h = harness(SchedulerConfig::default());
    let answer = Answer::default();
    let sink = Rc::clone(&answer);
    h.scheduler.start(
        StateBuilder::new("only")
            .on_cleanup(move |ctx| {
                let pushed = ctx.push_state(StateBuilder::new("late").build());
                sink.set(Some((pushed, ctx.is_running(), ctx.depth())));
            })
            .build(),
    );

    assert!(h.scheduler.pop_state());
    assert_eq!(answer.get(), Some((false, false, 0)));
    assert!(!h.scheduler.is_running());
    assert_eq!(h.scheduler.depth(), 0);
}

#[test]
fn hooks_see_transitions_already_queued() {
    let mut h = harness(SchedulerConfig::default());
    let answer = Answer::default();
    let sink = Rc::clone(&answer);
    let overlay = RefCell::new(Some(
        StateBuilder::new("overlay")
            .on_init(move |ctx| sink.set(Some((ctx.pop_state(), ctx.is_running(), ctx.depth()))))
            .build(),
    ));
    h.scheduler.start(
        StateBuilder::new("base")
            .on_update(move |ctx| {
                if let Some(next) = overlay.borrow_mut().take() {
                    assert!(ctx.push_state(next));
                    assert!(ctx.pop_state());
                    assert!(ctx.is_running());
                }
            })
            .build(),
    );

    // The overlay's init runs with the base's pop still queued, so its own
    // pop is the one that empties the stack.
    h.clock.set(100.0);
    let report = h.scheduler.frame();
    assert_eq!(answer.get(), Some((true, false, 0)));
    assert_eq!(report.ticks_run, 1);
    assert!(!report.drew);
    assert!(!h.scheduler.is_running());
    assert_eq!(h.scheduler.depth(), 0);
}

#[test]
fn last_pop_from_update_stops_without_draw() {
    let draws = Rc::new(Cell::new(0));
    let drawn = Rc::clone(&draws);
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(
        StateBuilder::new("only")
            .on_update(|ctx| {
                if ctx.current_tick() == 5 {
                    ctx.pop_state();
                }
            })
            .on_draw(move |_| drawn.set(drawn.get() + 1))
            .build(),
    );

    h.clock.set(1000.0);
    let report = h.scheduler.frame();
    assert_eq!(report.ticks_run, 5);
    assert!(!report.drew);
    assert_eq!(draws.get(), 0);
    assert!(!h.scheduler.is_running());
    assert_eq!(h.scheduler.depth(), 0);
}

#[test]
fn listener_registered_during_update_is_live_immediately() {
    let mut h = harness(SchedulerConfig::default());
    let registry = h.registry.clone();
    let live_after_register = Rc::new(Cell::new(0));
    let probe = Rc::clone(&live_after_register);
    h.scheduler.start(
        StateBuilder::new("a")
            .on_update(move |ctx| {
                if ctx.current_tick() == 1 {
                    ctx.register_listener(KEYBOARD, "keyup", ListenerCallback::new(|_| {}));
                    probe.set(registry.live_count());
                }
            })
            .build(),
    );

    h.clock.set(40.0);
    h.scheduler.frame();
    assert_eq!(live_after_register.get(), 1);
    assert_eq!(h.registry.count_for(KEYBOARD, &"keyup".into()), 1);
}

#[test]
fn only_the_top_state_is_ever_wired() {
    let mut h = harness(SchedulerConfig::default());
    h.scheduler.start(recording("a", &h.log).build());
    h.scheduler.push_state(recording("b", &h.log).build());
    h.scheduler.push_state(recording("c", &h.log).build());
    assert_eq!(h.scheduler.stack().active_count(), 1);
    assert_eq!(h.registry.live_count(), 1);

    h.scheduler.change_state(recording("d", &h.log).build());
    h.scheduler.pop_state();
    assert_eq!(h.scheduler.stack().names(), ["a", "b"]);
    assert_eq!(h.scheduler.stack().active_count(), 1);
    assert_eq!(h.registry.count_for(KEYBOARD, &"b".into()), 1);
}

#[test]
fn lerp_endpoints() {
    for (before, after) in [(0.0, 1.0), (-5.0, 5.0), (100.0, -100.0), (3.5, 3.5)] {
        assert!((lerp(before, after, 0.0) - before).abs() < 1e-12);
        assert!((lerp(before, after, 1.0) - after).abs() < 1e-12);
    }
}
