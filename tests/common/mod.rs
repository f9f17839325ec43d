// SHARED FIXTURES FOR THE INTEGRATION TESTS
// TWO-LEVEL REFERENCE TABLE + SIMULATED BOARD WITH A ZERO-DELAY STABLE POLL.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use gpu_dvfs::poll::PollConfig;
use gpu_dvfs::sim::SimBoard;
use gpu_dvfs::{DvfsConfig, DvfsController, LevelSpec, PerformanceTable};

pub const LOW_KHZ: u32 = 160_000;
pub const HIGH_KHZ: u32 = 266_000;
pub const LOW_UV: u32 = 875_000;
pub const HIGH_UV: u32 = 900_000;

pub fn level(clock_khz: u32, voltage_uv: u32, up: u8, down: u8, stay: u32) -> LevelSpec {
    LevelSpec {
        clock_khz,
        voltage_uv,
        up_threshold: up,
        down_threshold: down,
        stay_count: stay,
        mem_freq_hint: clock_khz * 2,
        int_freq_hint: clock_khz,
        cpu_freq_hint: clock_khz / 2,
    }
}

// idx0: 160MHz up=90 down=0 stay=3 / idx1: 266MHz up=100 down=54 stay=3
pub fn two_level_table() -> PerformanceTable {
    PerformanceTable::new(&[
        level(LOW_KHZ, LOW_UV, 90, 0, 3),
        level(HIGH_KHZ, HIGH_UV, 100, 54, 3),
    ])
    .unwrap()
}

// 5 LEVELS, 100..500MHz, EVEN BANDS, stay=2
pub fn five_level_table() -> PerformanceTable {
    PerformanceTable::new(&[
        level(100_000, 800_000, 80, 0, 2),
        level(200_000, 850_000, 80, 40, 2),
        level(300_000, 900_000, 80, 40, 2),
        level(400_000, 950_000, 80, 40, 2),
        level(500_000, 1_000_000, 100, 40, 2),
    ])
    .unwrap()
}

pub fn fast_config() -> DvfsConfig {
    DvfsConfig {
        stable_poll: PollConfig { max_attempts: 1000, delay: Duration::ZERO },
        ..DvfsConfig::default()
    }
}

pub fn controller(table: PerformanceTable, config: DvfsConfig) -> (DvfsController, Arc<SimBoard>) {
    let boot = *table.level(0);
    let board = SimBoard::new(boot.clock_khz, boot.voltage_uv);
    let ctl = DvfsController::init(table, boot.clock_khz, board.hardware(), config).unwrap();
    (ctl, board)
}

// ONE FULL WINDOW AT EXACTLY `pct` UTILIZATION
pub fn feed(ctl: &DvfsController, pct: u64) {
    for _ in 0..ctl.sampler().samples_per_window() {
        ctl.record_busy_idle(pct, 100 - pct);
    }
}
