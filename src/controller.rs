// GPU-DVFS CONTROLLER
// LIFECYCLE + PERIODIC ORCHESTRATION.
//
// TWO LOCKS, NEVER NESTED THE OTHER WAY ROUND:
//   GOVERNOR LOCK (spin):  GovernorState. SHORT-HELD, DECISION/LOCK UPDATES ONLY.
//   TRANSITION LOCK (std): TransitionEngine. HELD ACROSS THE SLOW HARDWARE POLL.
// tick(): GOVERNOR LOCK -> DECIDE -> RELEASE -> TRANSITION LOCK -> APPLY -> RELEASE.
// THE GOVERNOR LOCK IS ONLY EVER TAKEN *INSIDE* THE TRANSITION LOCK, NEVER AROUND IT.
//
// WORKER THREAD: ONE TICK PER INTERVAL. disable() INTERRUPTS THE WAIT
// AND JOINS, SO AN IN-FLIGHT apply() ALWAYS FINISHES FIRST.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{DvfsConfig, MAX_VOLTAGE_MARGIN_UV};
use crate::error::{DvfsError, TransitionError};
use crate::event::{Cause, EventLog, Outcome};
use crate::governor::{Governor, GovernorState, LockBound, LockOwner};
use crate::hw::Hardware;
use crate::sampler::UtilizationSampler;
use crate::table::PerformanceTable;
use crate::time_in_state::{now_ns, TimeInState};
use crate::transition::TransitionEngine;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    // LOOP PAUSED AFTER A POWER-GATED TRANSITION
    Suspended,
    Unchanged(u32),
    // CURRENT LEVEL MOVED (FORCED) BETWEEN DECISION AND APPLY. DECISION DROPPED.
    Superseded,
    Transitioned { from: u32, to: u32 },
    // CLOCK NEVER REPORTED STABLE. LEVEL STILL CONFIRMED.
    Unstable { from: u32, to: u32 },
    PowerGated,
    Failed(TransitionError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DvfsStatus {
    pub enabled: bool,
    pub suspended: bool,
    pub governor: Governor,
    pub current_index: u32,
    pub clock_khz: u32,
    pub voltage_uv: u32,
    pub utilization: u8,
    pub down_requirement: u32,
    pub min_lock: Option<u32>,
    pub max_lock: Option<u32>,
}

struct Accounting {
    time_in_state: TimeInState,
    log: EventLog,
}

struct Shared {
    table: Arc<PerformanceTable>,
    governor: Governor,
    sampler: Arc<UtilizationSampler>,
    state: spin::Mutex<GovernorState>,
    engine: Mutex<TransitionEngine>,
    accounting: Mutex<Accounting>,
    suspended: AtomicBool,
    voltage_uv: AtomicU32,
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct DvfsController {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    interval: Duration,
}

// POISON MEANS A PANIC MID-UPDATE ELSEWHERE. THE DATA IS STILL THE BEST WE HAVE.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DvfsController {
    pub fn init(
        table: PerformanceTable,
        initial_clock_khz: u32,
        hw: Hardware,
        config: DvfsConfig,
    ) -> Result<Self, DvfsError> {
        let initial = table
            .level_for_clock(initial_clock_khz)
            .ok_or(DvfsError::UnknownInitialClock(initial_clock_khz))?;

        let table = Arc::new(table);
        let state = GovernorState::new(&table, initial);
        let engine = TransitionEngine::new(Arc::clone(&table), hw, &config);
        let voltage_uv = engine.rail_voltage();

        log_info!(
            "DVFS: INIT {} LEVELS, BOOT LEVEL {} ({} kHz), GOVERNOR {}",
            table.len(), initial, initial_clock_khz, config.governor.label(),
        );

        let shared = Shared {
            sampler: Arc::new(UtilizationSampler::new(config.samples_per_window)),
            governor: config.governor,
            state: spin::Mutex::new(state),
            engine: Mutex::new(engine),
            accounting: Mutex::new(Accounting {
                time_in_state: TimeInState::new(table.len(), initial, now_ns()),
                log: EventLog::new(),
            }),
            suspended: AtomicBool::new(false),
            voltage_uv: AtomicU32::new(voltage_uv),
            table,
        };

        Ok(Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
            interval: config.effective_interval(),
        })
    }

    pub fn table(&self) -> &PerformanceTable {
        &self.shared.table
    }

    // HANDLE FOR THE PLATFORM METRICS CALLBACK
    pub fn sampler(&self) -> Arc<UtilizationSampler> {
        Arc::clone(&self.shared.sampler)
    }

    pub fn record_busy_idle(&self, busy_ticks: u64, idle_ticks: u64) {
        self.shared.sampler.record_busy_idle(busy_ticks, idle_ticks);
    }

    // --- LIFECYCLE ---

    pub fn default_interval(&self) -> Duration {
        self.interval
    }

    // STARTS THE PERIODIC TICK. NO-OP WHEN ALREADY ENABLED.
    pub fn enable(&self, interval: Duration) -> Result<(), DvfsError> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        let interval = interval.max(Duration::from_millis(crate::config::MIN_INTERVAL_MS));
        let shared = Arc::clone(&self.shared);
        let (stop, rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("gpu-dvfs".to_string())
            .spawn(move || {
                // ANY MESSAGE OR A DROPPED SENDER ENDS THE LOOP
                while let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(interval) {
                    shared.tick();
                }
            })
            .map_err(|e| DvfsError::WorkerSpawn(e.to_string()))?;

        *worker = Some(Worker { stop, handle });
        log_info!("DVFS: ENABLED ({} ms)", interval.as_millis());
        Ok(())
    }

    // STOPS THE PERIODIC TICK AND WAITS FOR ANY IN-FLIGHT TRANSITION.
    // HINTS ARE RELEASED ON EVERY CALL: force_level() CAN PUSH THEM
    // WHILE NO WORKER IS RUNNING.
    pub fn disable(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            let _ = worker.stop.send(());
            if worker.handle.join().is_err() {
                log_warn!("DVFS: WORKER PANICKED");
            }
            log_info!("DVFS: DISABLED");
        }

        lock(&self.shared.engine).release_hints();
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.worker).is_some()
    }

    // --- CONTROL ---

    pub fn tick(&self) -> TickOutcome {
        self.shared.tick()
    }

    // ONE-SHOT CHANGE, BYPASSES THE GOVERNOR DECISION.
    // LOCKS NOT APPLIED, HYSTERESIS COUNTDOWN LEFT ALONE.
    // EVERY ERROR (SOFT ONES INCLUDED) GOES BACK TO THE CALLER.
    pub fn force_level(&self, index: u32, requested_by: LockOwner) -> Result<(), DvfsError> {
        if !self.shared.table.contains(index) {
            return Err(DvfsError::InvalidLevel { index, reason: "outside performance table" });
        }

        let util = self.shared.sampler.current_utilization();
        let (from, result) = self.shared.transition(None, index, util, Cause::Forced)
            .unwrap_or_else(|| (index, Ok(())));

        match &result {
            Ok(()) => log_info!("DVFS: FORCED {} -> {} BY {}", from, index, requested_by.label()),
            Err(e) => log_warn!("DVFS: FORCED {} -> {} BY {} FAILED: {}", from, index, requested_by.label(), e),
        }
        result.map_err(DvfsError::from)
    }

    pub fn set_lock(&self, owner: LockOwner, bound: LockBound, index: u32) -> Result<(), DvfsError> {
        let mut state = self.shared.state.lock();
        state.set_lock(&self.shared.table, owner, bound, index)?;
        log_info!(
            "DVFS: {} {:?} LOCK = {} (EFFECTIVE {:?}..{:?})",
            owner.label(), bound, index, state.min_lock_index, state.max_lock_index,
        );
        Ok(())
    }

    pub fn clear_lock(&self, owner: LockOwner, bound: LockBound) {
        let mut state = self.shared.state.lock();
        state.clear_lock(owner, bound);
        log_info!(
            "DVFS: {} {:?} UNLOCK (EFFECTIVE {:?}..{:?})",
            owner.label(), bound, state.min_lock_index, state.max_lock_index,
        );
    }

    // CLOCK-UNIT LOCK: HIGHEST LEVEL AT OR BELOW clock_khz
    pub fn set_lock_clock(&self, owner: LockOwner, bound: LockBound, clock_khz: u32) -> Result<u32, DvfsError> {
        let index = self.shared.table.level_at_or_below(clock_khz).ok_or(DvfsError::InvalidLevel {
            index: 0,
            reason: "clock below the lowest level",
        })?;
        self.set_lock(owner, bound, index)?;
        Ok(index)
    }

    pub fn locks(&self) -> Vec<(LockOwner, LockBound, u32)> {
        self.shared.state.lock().active_locks()
    }

    // TAKES EFFECT ON THE NEXT TRANSITION
    pub fn set_voltage_margin(&self, uv: u32) -> Result<(), DvfsError> {
        if uv > MAX_VOLTAGE_MARGIN_UV {
            return Err(DvfsError::InvalidMargin(uv));
        }
        lock(&self.shared.engine).set_voltage_margin(uv);
        log_info!("DVFS: VOLTAGE MARGIN {} uV", uv);
        Ok(())
    }

    pub fn voltage_margin(&self) -> u32 {
        lock(&self.shared.engine).voltage_margin()
    }

    // EXTERNAL "POWER DOMAIN IS BACK" SIGNAL
    pub fn notify_power_ready(&self) {
        if self.shared.suspended.swap(false, Ordering::AcqRel) {
            log_info!("DVFS: POWER READY, RESUMING");
        }
    }

    // --- INTROSPECTION ---

    pub fn current_index(&self) -> u32 {
        self.shared.state.lock().current_index
    }

    pub fn status(&self) -> DvfsStatus {
        let state = self.shared.state.lock().clone();
        DvfsStatus {
            enabled: self.is_enabled(),
            suspended: self.shared.suspended.load(Ordering::Acquire),
            governor: self.shared.governor,
            current_index: state.current_index,
            clock_khz: self.shared.table.level(state.current_index).clock_khz,
            voltage_uv: self.shared.voltage_uv.load(Ordering::Relaxed),
            utilization: self.shared.sampler.current_utilization(),
            down_requirement: state.down_requirement,
            min_lock: state.min_lock_index,
            max_lock: state.max_lock_index,
        }
    }

    // (clock_khz, ns) PER LEVEL, INCLUDING TIME IN THE CURRENT LEVEL SO FAR
    pub fn time_in_state(&self) -> Vec<(u32, u64)> {
        let ns = lock(&self.shared.accounting).time_in_state.snapshot(now_ns());
        self.shared.table.iter().map(|l| l.clock_khz).zip(ns).collect()
    }

    pub fn reset_time_in_state(&self) {
        lock(&self.shared.accounting).time_in_state.reset(now_ns());
    }

    // f RUNS ON A SNAPSHOT, OUTSIDE THE ACCOUNTING LOCK, SO IT MAY CALL
    // BACK INTO THE CONTROLLER
    pub fn with_event_log<R>(&self, f: impl FnOnce(&EventLog) -> R) -> R {
        let log = lock(&self.shared.accounting).log.clone();
        f(&log)
    }
}

impl Drop for DvfsController {
    fn drop(&mut self) {
        self.disable();
    }
}

impl Shared {
    fn tick(&self) -> TickOutcome {
        if self.suspended.load(Ordering::Acquire) {
            return TickOutcome::Suspended;
        }

        let util = self.sampler.current_utilization();
        let (current, next) = {
            let mut state = self.state.lock();
            let current = state.current_index;
            (current, self.governor.decide_next(&mut state, &self.table, util))
        };

        if next == current {
            return TickOutcome::Unchanged(current);
        }

        let (from, result) = match self.transition(Some(current), next, util, Cause::Governor) {
            Some(r) => r,
            None => return TickOutcome::Superseded,
        };

        match result {
            Ok(()) => TickOutcome::Transitioned { from, to: next },
            Err(TransitionError::StableTimeout { .. }) => TickOutcome::Unstable { from, to: next },
            Err(TransitionError::DeviceNotPowered) => {
                self.suspended.store(true, Ordering::Release);
                log_warn!("DVFS: POWER DOMAIN OFF, PAUSING GOVERNOR");
                TickOutcome::PowerGated
            }
            Err(e) => {
                log_warn!("DVFS: {} -> {} FAILED: {}", from, next, e);
                TickOutcome::Failed(e)
            }
        }
    }

    // RUNS ONE TRANSITION UNDER THE TRANSITION LOCK AND CONFIRMS IT.
    // NONE: NOTHING TO DO (ALREADY THERE, OR expected_from IS STALE).
    fn transition(
        &self,
        expected_from: Option<u32>,
        to: u32,
        utilization: u8,
        cause: Cause,
    ) -> Option<(u32, Result<(), TransitionError>)> {
        let mut engine = lock(&self.engine);

        let from = self.state.lock().current_index;
        if from == to || expected_from.map_or(false, |e| e != from) {
            return None;
        }

        let req = engine.plan(from, to);
        let result = engine.apply(&req);
        let applied = matches!(result, Ok(()) | Err(TransitionError::StableTimeout { .. }));

        // RAIL AS LAST PROGRAMMED, EVEN WHEN A LATER STEP FAILED (NO ROLLBACK)
        self.voltage_uv.store(engine.rail_voltage(), Ordering::Relaxed);
        if applied {
            self.state.lock().current_index = to;
        }

        let mut acct = lock(&self.accounting);
        if applied {
            acct.time_in_state.switch(to, now_ns());
        }
        acct.log.record(from, to, utilization, cause, Outcome::from_result(&result));

        Some((from, result))
    }
}
