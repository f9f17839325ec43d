// GPU-DVFS CONFIGURATION
// DEFAULTS, LIMITS, AND THE RUNTIME CONFIG STRUCT.
// ZERO HARDWARE DEPENDENCIES, SHARED BY THE CONTROLLER AND THE BINARY.

use std::time::Duration;

use crate::governor::Governor;
use crate::poll::PollConfig;

// CONTROL LOOP

pub const DEFAULT_INTERVAL_MS: u64 = 100;        // GOVERNOR TICK PERIOD
pub const MIN_INTERVAL_MS: u64     = 1;

// UTILIZATION WINDOW
// COUNTED IN record_busy_idle() CALLS, NOT IN BUSY+IDLE TICKS.

pub const DEFAULT_SAMPLES_PER_WINDOW: u32 = 1;

// CLOCK-STABLE POLL
// ~1000 SHORT POLLS BEFORE GIVING UP (SOFT FAILURE).

pub const STABLE_POLL_ATTEMPTS: u32 = 1000;
pub const STABLE_POLL_DELAY_US: u64 = 1;

// VOLTAGE

pub const DEFAULT_VOLTAGE_MARGIN_UV: u32 = 0;
pub const MAX_VOLTAGE_MARGIN_UV: u32     = 100_000;  // 100MV CEILING ON RUNTIME MARGIN

// STATIC (PING-PONG) GOVERNOR

pub const DEFAULT_STATIC_PERIOD_TICKS: u32 = 1;

#[derive(Clone, Debug)]
pub struct DvfsConfig {
    pub interval: Duration,
    pub samples_per_window: u32,
    pub voltage_margin_uv: u32,
    pub max_voltage_uv: Option<u32>,
    // VOLTAGE NEEDED WHILE THE MUX IS PARKED ON THE BYPASS CLOCK
    pub bypass_voltage_uv: Option<u32>,
    pub reparent_on_relock: bool,
    pub stable_poll: PollConfig,
    pub governor: Governor,
}

impl Default for DvfsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            samples_per_window: DEFAULT_SAMPLES_PER_WINDOW,
            voltage_margin_uv: DEFAULT_VOLTAGE_MARGIN_UV,
            max_voltage_uv: None,
            bypass_voltage_uv: None,
            reparent_on_relock: true,
            stable_poll: PollConfig {
                max_attempts: STABLE_POLL_ATTEMPTS,
                delay: Duration::from_micros(STABLE_POLL_DELAY_US),
            },
            governor: Governor::Utilization,
        }
    }
}

impl DvfsConfig {
    // INTERVAL FLOORED AT 1MS SO A ZERO FROM THE CLI CAN'T SPIN THE WORKER
    pub fn effective_interval(&self) -> Duration {
        self.interval.max(Duration::from_millis(MIN_INTERVAL_MS))
    }
}
