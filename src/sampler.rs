// GPU-DVFS UTILIZATION SAMPLER
// ACCUMULATES BUSY/IDLE TIME FROM THE METRICS CALLBACK, PUBLISHES A
// 0-100% FIGURE ONCE PER WINDOW.
//
// ACCUMULATOR: SHORT-HELD SPIN LOCK (SAFE FROM THE METRICS CONTEXT).
// PUBLISHED VALUE: SINGLE ATOMIC, READ LOCK-FREE BY THE GOVERNOR TICK.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Default)]
struct Window {
    busy: u64,
    idle: u64,
    samples: u32,
}

pub struct UtilizationSampler {
    window: spin::Mutex<Window>,
    samples_per_window: u32,
    utilization: AtomicU8,
}

impl UtilizationSampler {
    pub fn new(samples_per_window: u32) -> Self {
        Self {
            window: spin::Mutex::new(Window::default()),
            samples_per_window: samples_per_window.max(1),
            utilization: AtomicU8::new(0),
        }
    }

    // CALLED FROM THE PLATFORM METRICS CALLBACK. NEVER BLOCKS FOR LONG.
    pub fn record_busy_idle(&self, busy_ticks: u64, idle_ticks: u64) {
        let mut w = self.window.lock();
        w.busy = w.busy.saturating_add(busy_ticks);
        w.idle = w.idle.saturating_add(idle_ticks);
        w.samples += 1;

        if w.samples < self.samples_per_window {
            return;
        }

        // EMPTY WINDOW: KEEP THE PREVIOUS FIGURE, DON'T FAKE 0%
        if let Some(pct) = utilization_pct(w.busy, w.idle) {
            self.utilization.store(pct, Ordering::Relaxed);
        }
        *w = Window::default();
    }

    pub fn current_utilization(&self) -> u8 {
        self.utilization.load(Ordering::Relaxed)
    }

    pub fn samples_per_window(&self) -> u32 {
        self.samples_per_window
    }
}

// NONE WHEN busy + idle == 0
pub fn utilization_pct(busy: u64, idle: u64) -> Option<u8> {
    let total = busy as u128 + idle as u128;
    if total == 0 {
        return None;
    }
    Some((busy as u128 * 100 / total) as u8)
}
