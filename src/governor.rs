// GPU-DVFS GOVERNOR
// PURE DECISION LOGIC: (STATE, UTILIZATION) -> NEXT LEVEL INDEX.
// NEVER TOUCHES HARDWARE, NEVER FAILS ON THE DECISION PATH.
//
// UTILIZATION GOVERNOR: SINGLE-STEP WITH HYSTERESIS.
//   UP:   util > up_threshold -> ONE LEVEL UP, IMMEDIATELY.
//   DOWN: util < down_threshold FOR stay_count CONSECUTIVE TICKS -> ONE LEVEL DOWN.
//   DEAD BAND RESETS THE DOWN COUNTDOWN.
// STATIC GOVERNOR: IGNORES LOAD, SWEEPS min..max..min FOR SOAK TESTING.
// LOCKS FROM EVERY OWNER CLAMP THE RESULT AS HARD BOUNDS.

use crate::error::DvfsError;
use crate::table::PerformanceTable;

// LOCK OWNERS

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum LockOwner {
    Thermal = 0,
    Sysfs = 1,
    PmQos = 2,
    TestGovernor = 3,
}

pub const OWNER_COUNT: usize = 4;

impl LockOwner {
    pub const ALL: [LockOwner; OWNER_COUNT] = [
        LockOwner::Thermal,
        LockOwner::Sysfs,
        LockOwner::PmQos,
        LockOwner::TestGovernor,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Thermal => "THERMAL",
            Self::Sysfs => "SYSFS",
            Self::PmQos => "PMQOS",
            Self::TestGovernor => "TEST",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum LockBound {
    Min,
    Max,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Up,
    Down,
}

// GOVERNOR SELECTION (FIXED AT INIT)

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Governor {
    Utilization,
    StaticPingPong { period_ticks: u32 },
}

impl Governor {
    pub fn label(self) -> &'static str {
        match self {
            Self::Utilization => "utilization",
            Self::StaticPingPong { .. } => "static",
        }
    }

    // NEXT LEVEL INDEX. UPDATES THE COUNTDOWN (AND THE STATIC SWEEP
    // DIRECTION), NEVER current_index: THAT IS CONFIRMED AFTER HARDWARE MOVES.
    pub fn decide_next(
        &self,
        state: &mut GovernorState,
        table: &PerformanceTable,
        utilization: u8,
    ) -> u32 {
        state.utilization_percent = utilization;
        let current = state.current_index.min(table.max_index());

        let next = match *self {
            Self::Utilization => step_utilization(state, table, current, utilization),
            Self::StaticPingPong { period_ticks } => step_static(state, table, current, period_ticks),
        };

        let clamped = state.clamp(next);
        if clamped != next && clamped != current {
            state.down_requirement = table.level(clamped).stay_count;
        }
        clamped
    }
}

fn step_utilization(
    state: &mut GovernorState,
    table: &PerformanceTable,
    current: u32,
    utilization: u8,
) -> u32 {
    let level = table.level(current);

    if utilization > level.up_threshold && current < table.max_index() {
        let next = current + 1;
        state.down_requirement = table.level(next).stay_count;
        next
    } else if current > 0 && utilization < level.down_threshold {
        state.down_requirement = state.down_requirement.saturating_sub(1);
        if state.down_requirement == 0 {
            let next = current - 1;
            state.down_requirement = table.level(next).stay_count;
            next
        } else {
            current
        }
    } else {
        state.down_requirement = level.stay_count;
        current
    }
}

fn step_static(
    state: &mut GovernorState,
    table: &PerformanceTable,
    current: u32,
    period_ticks: u32,
) -> u32 {
    state.static_ticks += 1;
    if state.static_ticks < period_ticks.max(1) {
        return current;
    }
    state.static_ticks = 0;

    let lo = state.min_lock_index.unwrap_or(0);
    let hi = state.max_lock_index.unwrap_or(table.max_index());

    match state.direction {
        Direction::Up if current < hi => current + 1,
        Direction::Up => {
            state.direction = Direction::Down;
            if current > lo { current - 1 } else { current }
        }
        Direction::Down if current > lo => current - 1,
        Direction::Down => {
            state.direction = Direction::Up;
            if current < hi { current + 1 } else { current }
        }
    }
}

// GOVERNOR STATE
// OWNED BY THE CONTROLLER, MUTATED ONLY UNDER ITS GOVERNOR LOCK.

#[derive(Clone, Debug)]
pub struct GovernorState {
    pub current_index: u32,
    pub utilization_percent: u8,
    pub down_requirement: u32,
    pub min_lock_index: Option<u32>,
    pub max_lock_index: Option<u32>,
    pub per_owner_min: [Option<u32>; OWNER_COUNT],
    pub per_owner_max: [Option<u32>; OWNER_COUNT],
    direction: Direction,
    static_ticks: u32,
}

impl GovernorState {
    pub fn new(table: &PerformanceTable, current_index: u32) -> Self {
        Self {
            current_index,
            utilization_percent: 0,
            down_requirement: table.level(current_index).stay_count,
            min_lock_index: None,
            max_lock_index: None,
            per_owner_min: [None; OWNER_COUNT],
            per_owner_max: [None; OWNER_COUNT],
            direction: Direction::Up,
            static_ticks: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn clamp(&self, index: u32) -> u32 {
        let mut i = index;
        if let Some(max) = self.max_lock_index {
            i = i.min(max);
        }
        if let Some(min) = self.min_lock_index {
            i = i.max(min);
        }
        i
    }

    pub fn set_lock(
        &mut self,
        table: &PerformanceTable,
        owner: LockOwner,
        bound: LockBound,
        index: u32,
    ) -> Result<(), DvfsError> {
        if !table.contains(index) {
            return Err(DvfsError::InvalidLevel { index, reason: "outside performance table" });
        }
        match bound {
            LockBound::Min => {
                if self.max_lock_index.map_or(false, |max| index > max) {
                    return Err(DvfsError::InvalidLevel { index, reason: "min lock above active max lock" });
                }
                self.per_owner_min[owner as usize] = Some(index);
            }
            LockBound::Max => {
                if self.min_lock_index.map_or(false, |min| index < min) {
                    return Err(DvfsError::InvalidLevel { index, reason: "max lock below active min lock" });
                }
                self.per_owner_max[owner as usize] = Some(index);
            }
        }
        self.recompute_locks();
        Ok(())
    }

    pub fn clear_lock(&mut self, owner: LockOwner, bound: LockBound) {
        match bound {
            LockBound::Min => self.per_owner_min[owner as usize] = None,
            LockBound::Max => self.per_owner_max[owner as usize] = None,
        }
        self.recompute_locks();
    }

    // MAX OF MINS, MIN OF MAXES
    fn recompute_locks(&mut self) {
        self.min_lock_index = self.per_owner_min.iter().flatten().copied().max();
        self.max_lock_index = self.per_owner_max.iter().flatten().copied().min();
    }

    pub fn active_locks(&self) -> Vec<(LockOwner, LockBound, u32)> {
        let mut out = Vec::new();
        for owner in LockOwner::ALL {
            if let Some(i) = self.per_owner_min[owner as usize] {
                out.push((owner, LockBound::Min, i));
            }
            if let Some(i) = self.per_owner_max[owner as usize] {
                out.push((owner, LockBound::Max, i));
            }
        }
        out
    }
}
