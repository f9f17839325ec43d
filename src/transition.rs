// GPU-DVFS TRANSITION ENGINE
// ONE HARDWARE TRANSITION, IN THE ONLY SAFE ORDER:
//
//   RAISING:  VOLTAGE UP -> CLOCK UP -> WAIT STABLE -> HINTS
//   LOWERING: CLOCK DOWN -> WAIT STABLE -> HINTS -> VOLTAGE DOWN
//
// THE RAIL NEVER SITS BELOW WHAT THE ACTIVE CLOCK NEEDS, NOT EVEN BRIEFLY.
// NO ROLLBACK ON A MID-SEQUENCE COLLABORATOR FAILURE.
// CALLER HOLDS THE TRANSITION LOCK FOR THE WHOLE apply().

use std::sync::Arc;

use crate::config::DvfsConfig;
use crate::error::TransitionError;
use crate::hw::{ClockId, Hardware, HintKind};
use crate::poll::{poll_until, PollConfig};
use crate::table::{PerformanceLevel, PerformanceTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionRequest {
    pub from_index: u32,
    pub to_index: u32,
    pub target_voltage_uv: u32,
    pub safe_intermediate_voltage_uv: Option<u32>,
}

pub struct TransitionEngine {
    table: Arc<PerformanceTable>,
    hw: Hardware,
    voltage_margin_uv: u32,
    max_voltage_uv: Option<u32>,
    bypass_voltage_uv: Option<u32>,
    reparent_on_relock: bool,
    stable_poll: PollConfig,
}

impl TransitionEngine {
    pub fn new(table: Arc<PerformanceTable>, hw: Hardware, config: &DvfsConfig) -> Self {
        Self {
            table,
            hw,
            voltage_margin_uv: config.voltage_margin_uv,
            max_voltage_uv: config.max_voltage_uv,
            bypass_voltage_uv: config.bypass_voltage_uv,
            reparent_on_relock: config.reparent_on_relock,
            stable_poll: config.stable_poll,
        }
    }

    pub fn table(&self) -> &PerformanceTable {
        &self.table
    }

    // LEVEL VOLTAGE + MARGIN, CLAMPED TO THE RAIL CEILING IF ONE IS SET
    pub fn target_voltage(&self, index: u32) -> Option<u32> {
        let uv = self.table.get(index)?.voltage_uv.saturating_add(self.voltage_margin_uv);
        Some(match self.max_voltage_uv {
            Some(max) => uv.min(max),
            None => uv,
        })
    }

    // REQUEST FOR from -> to. AN OUT-OF-RANGE to GETS A ZERO TARGET VOLTAGE;
    // apply() REJECTS IT BEFORE ANYTHING IS TOUCHED.
    pub fn plan(&self, from_index: u32, to_index: u32) -> TransitionRequest {
        let target = self.target_voltage(to_index).unwrap_or(0);
        let from_v = self.target_voltage(from_index).unwrap_or(0);

        // ONLY NEEDED WHEN THE BYPASS PARENT DEMANDS MORE THAN EITHER END
        let safe = if self.reparent_on_relock {
            self.bypass_voltage_uv.filter(|&v| v > target.max(from_v))
        } else {
            None
        };

        TransitionRequest {
            from_index,
            to_index,
            target_voltage_uv: target,
            safe_intermediate_voltage_uv: safe,
        }
    }

    pub fn apply(&mut self, req: &TransitionRequest) -> Result<(), TransitionError> {
        if req.from_index == req.to_index {
            return Ok(());
        }

        let len = self.table.len();
        if req.to_index >= len || req.from_index >= len {
            return Err(TransitionError::OutOfRange { from: req.from_index, to: req.to_index, len });
        }

        if !self.hw.power.is_powered() {
            return Err(TransitionError::DeviceNotPowered);
        }

        let level = *self.table.level(req.to_index);
        let raising = req.to_index > req.from_index;

        let stable = if raising {
            let pre = req.safe_intermediate_voltage_uv
                .map_or(req.target_voltage_uv, |safe| safe.max(req.target_voltage_uv));
            self.set_voltage(pre)?;
            let stable = self.program_clock(level.clock_khz)?;
            if pre != req.target_voltage_uv {
                self.set_voltage(req.target_voltage_uv)?;
            }
            self.push_hints(&level);
            stable
        } else {
            if let Some(safe) = req.safe_intermediate_voltage_uv {
                self.set_voltage(safe)?;
            }
            let stable = self.program_clock(level.clock_khz)?;
            self.push_hints(&level);
            self.set_voltage(req.target_voltage_uv)?;
            stable
        };

        log_debug!(
            "DVFS: {} -> {} ({} kHz, {} uV){}",
            req.from_index, req.to_index, level.clock_khz, req.target_voltage_uv,
            if stable { "" } else { " [UNSTABLE]" },
        );

        if !stable {
            log_warn!(
                "DVFS: {} kHz NOT STABLE AFTER {} POLLS, CONTINUING",
                level.clock_khz, self.stable_poll.max_attempts,
            );
            return Err(TransitionError::StableTimeout { attempts: self.stable_poll.max_attempts });
        }
        Ok(())
    }

    // PLL RELOCK: PARK MUX ON OSCILLATOR, RETUNE PLL, WAIT, SWITCH BACK.
    // RETURNS WHETHER THE PLL REPORTED STABLE INSIDE THE POLL BUDGET.
    fn program_clock(&mut self, khz: u32) -> Result<bool, TransitionError> {
        let reparent = self.reparent_on_relock;
        let poll = self.stable_poll;
        let clock = &mut self.hw.clock;

        if reparent {
            clock.set_parent(ClockId::GpuMux, ClockId::Oscillator)?;
        }
        clock.set_rate(ClockId::GpuPll, khz)?;
        let stable = poll_until(|| clock.is_stable(ClockId::GpuPll), poll.max_attempts, poll.delay);
        if reparent {
            clock.set_parent(ClockId::GpuMux, ClockId::GpuPll)?;
        }
        Ok(stable)
    }

    fn set_voltage(&mut self, uv: u32) -> Result<(), TransitionError> {
        self.hw.rail.set_voltage(uv)?;
        Ok(())
    }

    fn push_hints(&mut self, level: &PerformanceLevel) {
        self.hw.hints.update(HintKind::MemFreq, level.mem_freq_hint);
        self.hw.hints.update(HintKind::IntFreq, level.int_freq_hint);
        self.hw.hints.update(HintKind::CpuFreq, level.cpu_freq_hint);
    }

    // DISABLE PATH: DROP EVERY HINT TO IDLE
    pub fn release_hints(&mut self) {
        for kind in HintKind::ALL {
            self.hw.hints.update(kind, 0);
        }
    }

    pub fn is_powered(&self) -> bool {
        self.hw.power.is_powered()
    }

    pub fn rail_voltage(&self) -> u32 {
        self.hw.rail.get_voltage()
    }

    pub fn voltage_margin(&self) -> u32 {
        self.voltage_margin_uv
    }

    pub fn set_voltage_margin(&mut self, uv: u32) {
        self.voltage_margin_uv = uv;
    }
}
