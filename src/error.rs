// GPU-DVFS ERROR TAXONOMY

use thiserror::Error;

use crate::hw::{ClockError, RailError};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("performance table is empty")]
    Empty,
    #[error("level {index}: clock {khz} kHz is not above the previous level ({prev_khz} kHz)")]
    NotAscending { index: u32, khz: u32, prev_khz: u32 },
    #[error("level {index}: threshold {value} exceeds 100")]
    ThresholdRange { index: u32, value: u8 },
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("transition {from} -> {to} outside table of {len} levels")]
    OutOfRange { from: u32, to: u32, len: u32 },
    #[error("gpu power domain is off")]
    DeviceNotPowered,
    #[error("clock tree: {0}")]
    Clock(#[from] ClockError),
    #[error("voltage rail: {0}")]
    Rail(#[from] RailError),
    #[error("clock did not report stable after {attempts} polls")]
    StableTimeout { attempts: u32 },
}

impl TransitionError {
    // SOFT: THE TRANSITION STILL COUNTS AS APPLIED
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::StableTimeout { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DvfsError {
    #[error("invalid level {index}: {reason}")]
    InvalidLevel { index: u32, reason: &'static str },
    #[error("initial clock {0} kHz matches no performance level")]
    UnknownInitialClock(u32),
    #[error("voltage margin {0} uV above limit")]
    InvalidMargin(u32),
    #[error("cannot start governor worker: {0}")]
    WorkerSpawn(String),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}
