// GPU-DVFS SIMULATED HARDWARE
// IN-MEMORY CLOCK TREE / RAIL / HINT BUS / POWER DOMAIN.
//
// EVERY COLLABORATOR CALL IS JOURNALED IN ORDER, SO THE SAME BOARD SERVES
// THE CLI SIMULATOR AND THE ORDERING TESTS. FAULTS CAN BE INJECTED.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::hw::{
    ClockError, ClockId, ClockTree, Hardware, HintKind, PowerDomain, RailError,
    ResourceHintBus, VoltageRail,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HwCall {
    SetParent { clock: ClockId, parent: ClockId },
    SetRate { clock: ClockId, khz: u32 },
    SetVoltage(u32),
    Hint(HintKind, u32),
}

pub struct SimBoard {
    journal: Mutex<Vec<HwCall>>,
    powered: AtomicBool,
    pll_khz: AtomicU32,
    mux_on_pll: AtomicBool,
    voltage_uv: AtomicU32,
    hints: [AtomicU32; 3],
    // FAULT INJECTION
    reject_rate: AtomicBool,
    reject_voltage: AtomicBool,
    never_stable: AtomicBool,
    settle_polls: AtomicU32,
    pending_polls: AtomicU32,
}

impl SimBoard {
    pub fn new(boot_khz: u32, boot_uv: u32) -> Arc<Self> {
        Arc::new(Self {
            journal: Mutex::new(Vec::new()),
            powered: AtomicBool::new(true),
            pll_khz: AtomicU32::new(boot_khz),
            mux_on_pll: AtomicBool::new(true),
            voltage_uv: AtomicU32::new(boot_uv),
            hints: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
            reject_rate: AtomicBool::new(false),
            reject_voltage: AtomicBool::new(false),
            never_stable: AtomicBool::new(false),
            settle_polls: AtomicU32::new(0),
            pending_polls: AtomicU32::new(0),
        })
    }

    pub fn hardware(self: &Arc<Self>) -> Hardware {
        Hardware {
            clock: Box::new(SimClockTree(Arc::clone(self))),
            rail: Box::new(SimRail(Arc::clone(self))),
            hints: Box::new(SimHintBus(Arc::clone(self))),
            power: Box::new(SimPower(Arc::clone(self))),
        }
    }

    fn push(&self, call: HwCall) {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    pub fn journal(&self) -> Vec<HwCall> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    // EFFECTIVE GPU CLOCK: PLL RATE ONLY WHILE THE MUX SELECTS IT
    pub fn clock_khz(&self) -> u32 {
        if self.mux_on_pll.load(Ordering::Relaxed) {
            self.pll_khz.load(Ordering::Relaxed)
        } else {
            OSCILLATOR_KHZ
        }
    }

    pub fn voltage_uv(&self) -> u32 {
        self.voltage_uv.load(Ordering::Relaxed)
    }

    pub fn hint(&self, kind: HintKind) -> u32 {
        self.hints[hint_slot(kind)].load(Ordering::Relaxed)
    }

    pub fn set_powered(&self, on: bool) {
        self.powered.store(on, Ordering::Relaxed);
    }

    pub fn set_reject_rate(&self, on: bool) {
        self.reject_rate.store(on, Ordering::Relaxed);
    }

    pub fn set_reject_voltage(&self, on: bool) {
        self.reject_voltage.store(on, Ordering::Relaxed);
    }

    pub fn set_never_stable(&self, on: bool) {
        self.never_stable.store(on, Ordering::Relaxed);
    }

    // NUMBER OF is_stable() POLLS THAT REPORT BUSY AFTER EACH set_rate()
    pub fn set_settle_polls(&self, polls: u32) {
        self.settle_polls.store(polls, Ordering::Relaxed);
    }
}

pub const OSCILLATOR_KHZ: u32 = 24_000;

fn hint_slot(kind: HintKind) -> usize {
    match kind {
        HintKind::MemFreq => 0,
        HintKind::IntFreq => 1,
        HintKind::CpuFreq => 2,
    }
}

pub struct SimClockTree(Arc<SimBoard>);

impl ClockTree for SimClockTree {
    fn set_rate(&mut self, clock: ClockId, khz: u32) -> Result<(), ClockError> {
        self.0.push(HwCall::SetRate { clock, khz });
        if clock != ClockId::GpuPll || self.0.reject_rate.load(Ordering::Relaxed) {
            return Err(ClockError::RateRejected { clock, khz });
        }
        self.0.pll_khz.store(khz, Ordering::Relaxed);
        self.0.pending_polls.store(self.0.settle_polls.load(Ordering::Relaxed), Ordering::Relaxed);
        Ok(())
    }

    fn set_parent(&mut self, clock: ClockId, parent: ClockId) -> Result<(), ClockError> {
        self.0.push(HwCall::SetParent { clock, parent });
        match (clock, parent) {
            (ClockId::GpuMux, ClockId::GpuPll) => self.0.mux_on_pll.store(true, Ordering::Relaxed),
            (ClockId::GpuMux, ClockId::Oscillator) => self.0.mux_on_pll.store(false, Ordering::Relaxed),
            _ => return Err(ClockError::ParentRejected { clock, parent }),
        }
        Ok(())
    }

    fn is_stable(&self, _clock: ClockId) -> bool {
        if self.0.never_stable.load(Ordering::Relaxed) {
            return false;
        }
        self.0.pending_polls
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_err()
    }
}

pub struct SimRail(Arc<SimBoard>);

impl VoltageRail for SimRail {
    fn set_voltage(&mut self, uv: u32) -> Result<(), RailError> {
        self.0.push(HwCall::SetVoltage(uv));
        if self.0.reject_voltage.load(Ordering::Relaxed) {
            return Err(RailError::Rejected { uv });
        }
        self.0.voltage_uv.store(uv, Ordering::Relaxed);
        Ok(())
    }

    fn get_voltage(&self) -> u32 {
        self.0.voltage_uv()
    }
}

pub struct SimHintBus(Arc<SimBoard>);

impl ResourceHintBus for SimHintBus {
    fn update(&mut self, kind: HintKind, value: u32) {
        self.0.push(HwCall::Hint(kind, value));
        self.0.hints[hint_slot(kind)].store(value, Ordering::Relaxed);
    }
}

pub struct SimPower(Arc<SimBoard>);

impl PowerDomain for SimPower {
    fn is_powered(&self) -> bool {
        self.0.powered.load(Ordering::Relaxed)
    }
}

// LOAD MODEL
// WORK IS EXPRESSED AS THE GPU CLOCK (kHz) NEEDED TO KEEP UP.
// BUSY FRACTION = DEMAND / CURRENT CLOCK, CAPPED AT 100%.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadPattern {
    Constant { demand_khz: u32 },
    // TRIANGLE WAVE BETWEEN low AND high, ONE FULL CYCLE EVERY period SAMPLES
    Wave { low_khz: u32, high_khz: u32, period: u32 },
}

impl LoadPattern {
    pub fn demand_at(self, sample: u64) -> u32 {
        match self {
            Self::Constant { demand_khz } => demand_khz,
            Self::Wave { low_khz, high_khz, period } => {
                let period = period.max(2) as u64;
                let half = period / 2;
                let pos = sample % period;
                let rising = if pos < half { pos } else { period - pos };
                let span = high_khz.saturating_sub(low_khz) as u64;
                low_khz + (span * rising / half.max(1)) as u32
            }
        }
    }
}

// BUSY/IDLE SPLIT FOR ONE METRICS PERIOD OF period_ticks AT clock_khz
pub fn busy_idle(demand_khz: u32, clock_khz: u32, period_ticks: u64) -> (u64, u64) {
    if clock_khz == 0 {
        return (period_ticks, 0);
    }
    let busy = (period_ticks * demand_khz as u64 / clock_khz as u64).min(period_ticks);
    (busy, period_ticks - busy)
}
