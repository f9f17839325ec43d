// GPU-DVFS HARDWARE COLLABORATORS
// CLOCK TREE, VOLTAGE RAIL, RESOURCE HINT BUS, POWER DOMAIN.
//
// THE CORE ONLY SEES THESE TRAITS. ALL CALLS ARE SERIALIZED BY THE
// TRANSITION LOCK, SO IMPLEMENTATIONS NEED Send BUT NOT REENTRANCY.

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClockId {
    // GPU PLL: THE RATE-PROGRAMMABLE SOURCE
    GpuPll,
    // GPU MUX: SELECTS BETWEEN THE PLL AND THE BYPASS OSCILLATOR
    GpuMux,
    // FIXED OSCILLATOR, USED AS A SAFE PARENT DURING PLL RELOCK
    Oscillator,
}

impl ClockId {
    pub fn label(self) -> &'static str {
        match self {
            Self::GpuPll => "gpu_pll",
            Self::GpuMux => "gpu_mux",
            Self::Oscillator => "oscillator",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HintKind {
    MemFreq,
    IntFreq,
    CpuFreq,
}

impl HintKind {
    pub const ALL: [HintKind; 3] = [HintKind::MemFreq, HintKind::IntFreq, HintKind::CpuFreq];

    pub fn label(self) -> &'static str {
        match self {
            Self::MemFreq => "mem",
            Self::IntFreq => "int",
            Self::CpuFreq => "cpu",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("clock {} rejected rate {khz} kHz", .clock.label())]
    RateRejected { clock: ClockId, khz: u32 },
    #[error("clock {} cannot be parented to {}", .clock.label(), .parent.label())]
    ParentRejected { clock: ClockId, parent: ClockId },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RailError {
    #[error("rail rejected {uv} uV")]
    Rejected { uv: u32 },
}

pub trait ClockTree {
    fn set_rate(&mut self, clock: ClockId, khz: u32) -> Result<(), ClockError>;
    fn set_parent(&mut self, clock: ClockId, parent: ClockId) -> Result<(), ClockError>;
    // CLOCK-STABLE SIGNAL: FALSE WHILE A DIVIDER/PLL IS STILL SETTLING
    fn is_stable(&self, clock: ClockId) -> bool;
}

pub trait VoltageRail {
    fn set_voltage(&mut self, uv: u32) -> Result<(), RailError>;
    fn get_voltage(&self) -> u32;
}

pub trait ResourceHintBus {
    // 0 RELEASES THE HINT
    fn update(&mut self, kind: HintKind, value: u32);
}

pub trait PowerDomain {
    fn is_powered(&self) -> bool;
}

// EVERYTHING THE TRANSITION ENGINE DRIVES. OWNED BEHIND THE TRANSITION LOCK.
pub struct Hardware {
    pub clock: Box<dyn ClockTree + Send>,
    pub rail: Box<dyn VoltageRail + Send>,
    pub hints: Box<dyn ResourceHintBus + Send>,
    pub power: Box<dyn PowerDomain + Send>,
}
