// GPU-DVFS CONTROLLER TESTS
// END-TO-END: SAMPLER -> GOVERNOR -> TRANSITION ENGINE -> SIMULATED BOARD
//
// TICKS ARE DRIVEN BY HAND EXCEPT IN THE LIFECYCLE SECTION.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use gpu_dvfs::sim::{HwCall, SimBoard};
use gpu_dvfs::{
    DvfsConfig, DvfsController, DvfsError, Governor, HintKind, LockBound, LockOwner, TickOutcome,
    TransitionError,
};

use common::{
    controller, fast_config, feed, five_level_table, two_level_table, HIGH_KHZ, HIGH_UV, LOW_KHZ,
    LOW_UV,
};

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

// === INIT ===

#[test]
fn init_maps_boot_clock_to_level() {
    let board = SimBoard::new(HIGH_KHZ, HIGH_UV);
    let ctl = DvfsController::init(two_level_table(), HIGH_KHZ, board.hardware(), fast_config()).unwrap();
    let s = ctl.status();
    assert_eq!(s.current_index, 1);
    assert_eq!(s.clock_khz, HIGH_KHZ);
    assert_eq!(s.voltage_uv, HIGH_UV);
    assert_eq!(s.down_requirement, 3);
    assert!(!s.enabled);
    assert!(!s.suspended);
    assert_eq!(s.governor, Governor::Utilization);
    // INIT NEVER TOUCHES THE HARDWARE
    assert!(board.journal().is_empty());
}

#[test]
fn init_rejects_unknown_boot_clock() {
    let board = SimBoard::new(123_000, LOW_UV);
    let res = DvfsController::init(two_level_table(), 123_000, board.hardware(), fast_config());
    assert_eq!(res.err(), Some(DvfsError::UnknownInitialClock(123_000)));
}

// === GOVERNOR TICKS ===

#[test]
fn high_load_steps_up_then_idle_steps_down_on_third_tick() {
    let (ctl, board) = controller(two_level_table(), fast_config());

    feed(&ctl, 95);
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 0, to: 1 });
    assert_eq!(board.clock_khz(), HIGH_KHZ);
    assert_eq!(board.voltage_uv(), HIGH_UV);

    feed(&ctl, 10);
    assert_eq!(ctl.tick(), TickOutcome::Unchanged(1));
    assert_eq!(ctl.tick(), TickOutcome::Unchanged(1));
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 1, to: 0 });
    assert_eq!(board.clock_khz(), LOW_KHZ);
    assert_eq!(board.voltage_uv(), LOW_UV);
}

#[test]
fn thermal_cap_forces_level_down_under_load() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    feed(&ctl, 95);
    ctl.tick();
    assert_eq!(ctl.current_index(), 1);

    ctl.set_lock(LockOwner::Thermal, LockBound::Max, 0).unwrap();
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 1, to: 0 });
    assert_eq!(board.clock_khz(), LOW_KHZ);

    // STAYS DOWN WHILE THE CAP HOLDS
    for _ in 0..5 {
        assert_eq!(ctl.tick(), TickOutcome::Unchanged(0));
    }

    ctl.clear_lock(LockOwner::Thermal, LockBound::Max);
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 0, to: 1 });
}

#[test]
fn window_must_fill_before_utilization_changes() {
    let config = DvfsConfig { samples_per_window: 4, ..fast_config() };
    let (ctl, _board) = controller(two_level_table(), config);

    for _ in 0..3 {
        ctl.record_busy_idle(95, 5);
    }
    assert_eq!(ctl.tick(), TickOutcome::Unchanged(0));

    ctl.record_busy_idle(95, 5);
    assert_eq!(ctl.status().utilization, 95);
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 0, to: 1 });
}

#[test]
fn governor_ticks_move_one_level_at_a_time() {
    let (ctl, _board) = controller(five_level_table(), fast_config());
    let mut seed: u32 = 0xdead_beef;
    let mut moves = 0;
    for _ in 0..500 {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        feed(&ctl, ((seed >> 16) % 101) as u64);
        match ctl.tick() {
            TickOutcome::Transitioned { from, to } => {
                assert_eq!(from.abs_diff(to), 1, "{} -> {}", from, to);
                moves += 1;
            }
            TickOutcome::Unchanged(_) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert!(moves > 0);
}

#[test]
fn static_governor_sweeps_through_controller() {
    let config = DvfsConfig {
        governor: Governor::StaticPingPong { period_ticks: 1 },
        ..fast_config()
    };
    let (ctl, _board) = controller(two_level_table(), config);
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 0, to: 1 });
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 1, to: 0 });
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 0, to: 1 });
}

// === TICK FAILURE HANDLING ===

#[test]
fn failed_transition_is_swallowed_and_level_kept() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    board.set_reject_rate(true);
    feed(&ctl, 95);

    match ctl.tick() {
        TickOutcome::Failed(TransitionError::Clock(_)) => {}
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(ctl.current_index(), 0);

    // NEXT TICK RETRIES
    board.set_reject_rate(false);
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 0, to: 1 });
}

#[test]
fn failed_raise_reports_rail_as_programmed() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    board.set_reject_rate(true);
    feed(&ctl, 95);

    assert!(matches!(ctl.tick(), TickOutcome::Failed(TransitionError::Clock(_))));
    // RAIL ALREADY RAISED, CLOCK NOT: STATUS FOLLOWS THE RAIL
    assert_eq!(board.voltage_uv(), HIGH_UV);
    assert_eq!(ctl.status().voltage_uv, HIGH_UV);
    assert_eq!(ctl.current_index(), 0);
}

#[test]
fn rejected_rail_keeps_previous_voltage() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    board.set_reject_voltage(true);
    feed(&ctl, 95);

    assert!(matches!(ctl.tick(), TickOutcome::Failed(TransitionError::Rail(_))));
    assert_eq!(ctl.status().voltage_uv, LOW_UV);
}

#[test]
fn unstable_clock_still_confirms_level() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    board.set_never_stable(true);
    feed(&ctl, 95);
    assert_eq!(ctl.tick(), TickOutcome::Unstable { from: 0, to: 1 });
    assert_eq!(ctl.current_index(), 1);
    assert_eq!(ctl.status().voltage_uv, HIGH_UV);
}

#[test]
fn power_gate_suspends_until_power_ready() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    board.set_powered(false);
    feed(&ctl, 95);

    assert_eq!(ctl.tick(), TickOutcome::PowerGated);
    assert!(ctl.status().suspended);
    assert_eq!(ctl.current_index(), 0);

    // POWER BACK, BUT NO SIGNAL YET
    board.set_powered(true);
    assert_eq!(ctl.tick(), TickOutcome::Suspended);
    assert!(board.journal().is_empty());

    ctl.notify_power_ready();
    assert!(!ctl.status().suspended);
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 0, to: 1 });
}

// === FORCED LEVEL ===

#[test]
fn force_level_rejects_index_outside_table() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    let err = ctl.force_level(2, LockOwner::Sysfs).unwrap_err();
    assert!(matches!(err, DvfsError::InvalidLevel { index: 2, .. }));
    assert!(board.journal().is_empty());
}

#[test]
fn force_level_to_current_is_no_op() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    assert_eq!(ctl.force_level(0, LockOwner::Sysfs), Ok(()));
    assert!(board.journal().is_empty());
    ctl.with_event_log(|log| assert!(log.is_empty()));
}

#[test]
fn force_level_leaves_countdown_alone() {
    let (ctl, board) = controller(five_level_table(), fast_config());
    ctl.force_level(1, LockOwner::Sysfs).unwrap();

    feed(&ctl, 0);
    assert_eq!(ctl.tick(), TickOutcome::Unchanged(1));
    assert_eq!(ctl.status().down_requirement, 1);

    ctl.force_level(3, LockOwner::TestGovernor).unwrap();
    assert_eq!(ctl.current_index(), 3);
    assert_eq!(ctl.status().down_requirement, 1);
    assert_eq!(board.clock_khz(), 400_000);
}

#[test]
fn force_level_ignores_locks() {
    let (ctl, _board) = controller(five_level_table(), fast_config());
    ctl.set_lock(LockOwner::Thermal, LockBound::Max, 1).unwrap();
    ctl.force_level(4, LockOwner::TestGovernor).unwrap();
    assert_eq!(ctl.current_index(), 4);

    // NEXT GOVERNOR TICK PULLS IT BACK UNDER THE CAP
    feed(&ctl, 50);
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 4, to: 1 });
}

#[test]
fn force_level_surfaces_every_error() {
    let (ctl, board) = controller(two_level_table(), fast_config());

    board.set_reject_voltage(true);
    let err = ctl.force_level(1, LockOwner::Sysfs).unwrap_err();
    assert!(matches!(err, DvfsError::Transition(TransitionError::Rail(_))));
    assert_eq!(ctl.current_index(), 0);
    board.set_reject_voltage(false);

    board.set_powered(false);
    let err = ctl.force_level(1, LockOwner::Sysfs).unwrap_err();
    assert_eq!(err, DvfsError::Transition(TransitionError::DeviceNotPowered));
    // ONLY THE GOVERNOR LOOP SUSPENDS ON POWER GATING
    assert!(!ctl.status().suspended);
    board.set_powered(true);

    board.set_never_stable(true);
    let err = ctl.force_level(1, LockOwner::Sysfs).unwrap_err();
    assert!(matches!(err, DvfsError::Transition(TransitionError::StableTimeout { .. })));
    assert_eq!(ctl.current_index(), 1);
}

// === LOCKS ===

#[test]
fn clock_lock_rounds_down_to_a_level() {
    let (ctl, _board) = controller(two_level_table(), fast_config());
    assert_eq!(ctl.set_lock_clock(LockOwner::Thermal, LockBound::Max, 200_000), Ok(0));
    // EXACT MATCH STILL VALIDATED AGAINST THE OTHER BOUND
    let err = ctl.set_lock_clock(LockOwner::PmQos, LockBound::Min, HIGH_KHZ).unwrap_err();
    assert!(matches!(err, DvfsError::InvalidLevel { index: 1, .. }));
    assert_eq!(ctl.locks(), vec![(LockOwner::Thermal, LockBound::Max, 0)]);

    let err = ctl.set_lock_clock(LockOwner::Sysfs, LockBound::Min, 100_000).unwrap_err();
    assert!(matches!(err, DvfsError::InvalidLevel { .. }));
}

#[test]
fn locks_lists_every_active_bound() {
    let (ctl, _board) = controller(five_level_table(), fast_config());
    ctl.set_lock(LockOwner::Thermal, LockBound::Max, 3).unwrap();
    ctl.set_lock(LockOwner::Sysfs, LockBound::Min, 1).unwrap();
    ctl.set_lock(LockOwner::PmQos, LockBound::Min, 2).unwrap();

    let locks = ctl.locks();
    assert_eq!(locks.len(), 3);
    assert!(locks.contains(&(LockOwner::Thermal, LockBound::Max, 3)));
    assert!(locks.contains(&(LockOwner::Sysfs, LockBound::Min, 1)));
    assert!(locks.contains(&(LockOwner::PmQos, LockBound::Min, 2)));

    let s = ctl.status();
    assert_eq!((s.min_lock, s.max_lock), (Some(2), Some(3)));

    ctl.clear_lock(LockOwner::PmQos, LockBound::Min);
    assert_eq!(ctl.status().min_lock, Some(1));
}

// === VOLTAGE MARGIN ===

#[test]
fn voltage_margin_bounds_and_effect() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    assert_eq!(ctl.set_voltage_margin(100_001), Err(DvfsError::InvalidMargin(100_001)));
    assert_eq!(ctl.voltage_margin(), 0);

    ctl.set_voltage_margin(25_000).unwrap();
    assert_eq!(ctl.voltage_margin(), 25_000);

    feed(&ctl, 95);
    ctl.tick();
    assert_eq!(board.voltage_uv(), HIGH_UV + 25_000);
    assert_eq!(ctl.status().voltage_uv, HIGH_UV + 25_000);
}

// === LIFECYCLE ===

#[test]
fn enable_runs_worker_and_disable_releases_hints() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    ctl.enable(Duration::from_millis(1)).unwrap();
    assert!(ctl.is_enabled());
    // SECOND ENABLE IS A NO-OP
    ctl.enable(Duration::from_millis(1)).unwrap();

    feed(&ctl, 95);
    assert!(wait_for(|| ctl.current_index() == 1));
    assert_eq!(board.hint(HintKind::IntFreq), HIGH_KHZ);

    ctl.disable();
    assert!(!ctl.is_enabled());
    for kind in HintKind::ALL {
        assert_eq!(board.hint(kind), 0);
    }

    // IDEMPOTENT: ONLY THE HINT RELEASE REPEATS
    board.clear_journal();
    ctl.disable();
    assert!(!ctl.is_enabled());
    assert!(board.journal().iter().all(|c| matches!(c, HwCall::Hint(_, 0))));
}

#[test]
fn disable_releases_hints_pushed_while_stopped() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    ctl.enable(Duration::from_millis(50)).unwrap();
    ctl.disable();

    ctl.force_level(1, LockOwner::Sysfs).unwrap();
    assert_eq!(board.hint(HintKind::MemFreq), HIGH_KHZ * 2);

    ctl.disable();
    for kind in HintKind::ALL {
        assert_eq!(board.hint(kind), 0);
    }
}

#[test]
fn disable_on_never_enabled_controller_releases_hints() {
    let (ctl, board) = controller(two_level_table(), fast_config());
    feed(&ctl, 95);
    assert_eq!(ctl.tick(), TickOutcome::Transitioned { from: 0, to: 1 });
    assert_ne!(board.hint(HintKind::IntFreq), 0);

    ctl.disable();
    for kind in HintKind::ALL {
        assert_eq!(board.hint(kind), 0);
    }
}

#[test]
fn drop_stops_worker() {
    let board = {
        let (ctl, board) = controller(two_level_table(), fast_config());
        ctl.enable(Duration::from_millis(1)).unwrap();
        board
    };
    let hints: Vec<HwCall> = board.journal().into_iter().filter(|c| matches!(c, HwCall::Hint(_, 0))).collect();
    assert_eq!(hints.len(), HintKind::ALL.len());
}

#[test]
fn concurrent_locks_and_forces_with_worker_running() {
    let (ctl, _board) = controller(five_level_table(), fast_config());
    let ctl = Arc::new(ctl);
    ctl.enable(Duration::from_millis(1)).unwrap();

    let worker = {
        let ctl = Arc::clone(&ctl);
        std::thread::spawn(move || {
            for i in 0..200u32 {
                feed(&ctl, (i * 7 % 101) as u64);
                let _ = ctl.set_lock(LockOwner::Sysfs, LockBound::Max, 1 + i % 4);
                let _ = ctl.force_level(i % 5, LockOwner::TestGovernor);
                ctl.clear_lock(LockOwner::Sysfs, LockBound::Max);
            }
        })
    };
    worker.join().unwrap();

    ctl.set_lock(LockOwner::Thermal, LockBound::Max, 2).unwrap();
    assert!(wait_for(|| ctl.current_index() <= 2));
    ctl.disable();
    assert!(ctl.current_index() <= 2);
}

// === ACCOUNTING ===

#[test]
fn time_in_state_tracks_current_level() {
    let (ctl, _board) = controller(two_level_table(), fast_config());
    std::thread::sleep(Duration::from_millis(5));

    let tis = ctl.time_in_state();
    assert_eq!(tis.len(), 2);
    assert_eq!(tis[0].0, LOW_KHZ);
    assert_eq!(tis[1].0, HIGH_KHZ);
    assert!(tis[0].1 >= 5_000_000);
    assert_eq!(tis[1].1, 0);

    ctl.force_level(1, LockOwner::Sysfs).unwrap();
    std::thread::sleep(Duration::from_millis(2));
    let tis = ctl.time_in_state();
    assert!(tis[0].1 >= 5_000_000);
    assert!(tis[1].1 >= 2_000_000);

    ctl.reset_time_in_state();
    let tis = ctl.time_in_state();
    assert_eq!(tis[0].1, 0);
    assert!(tis[1].1 < 2_000_000);
}

#[test]
fn event_log_counts_every_attempt() {
    let (ctl, board) = controller(two_level_table(), fast_config());

    feed(&ctl, 95);
    ctl.tick();
    feed(&ctl, 10);
    for _ in 0..3 {
        ctl.tick();
    }
    ctl.force_level(1, LockOwner::Sysfs).unwrap();
    board.set_reject_rate(true);
    let _ = ctl.force_level(0, LockOwner::Sysfs);

    ctl.with_event_log(|log| {
        assert_eq!(log.len(), 4);
        let c = log.counts();
        assert_eq!(c.applied, 3);
        assert_eq!(c.failed, 1);
        assert_eq!(c.forced, 2);
        assert_eq!(c.up_steps, 2);
        assert_eq!(c.down_steps, 2);

        let last = log.iter_chronological().last().unwrap();
        assert_eq!((last.from, last.to), (1, 0));
    });
}

#[test]
fn event_log_closure_may_call_back_into_controller() {
    let (ctl, _board) = controller(two_level_table(), fast_config());
    ctl.force_level(1, LockOwner::Sysfs).unwrap();

    // RUNS ON A SNAPSHOT: NO DEADLOCK, AND THE NEW ATTEMPT ISN'T IN IT
    let seen = ctl.with_event_log(|log| {
        ctl.force_level(0, LockOwner::Thermal).unwrap();
        ctl.tick();
        log.len()
    });
    assert_eq!(seen, 1);
    assert_eq!(ctl.current_index(), 0);
    ctl.with_event_log(|log| assert_eq!(log.len(), 2));
}
