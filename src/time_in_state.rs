// GPU-DVFS TIME-IN-STATE
// NANOSECONDS SPENT AT EACH LEVEL, CHARGED WHEN THE LEVEL IS LEFT.
// TIMESTAMPS ARE PASSED IN SO THE ACCOUNTING IS TESTABLE OFFLINE.

pub struct TimeInState {
    accumulated_ns: Vec<u64>,
    current: usize,
    last_sample_ns: u64,
}

impl TimeInState {
    pub fn new(levels: u32, current: u32, now: u64) -> Self {
        Self {
            accumulated_ns: vec![0; levels as usize],
            current: current as usize,
            last_sample_ns: now,
        }
    }

    // CHARGE THE LEVEL BEING LEFT, THEN START TIMING THE NEW ONE
    pub fn switch(&mut self, to: u32, now: u64) {
        self.charge(now);
        self.current = to as usize;
    }

    fn charge(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_sample_ns);
        if let Some(slot) = self.accumulated_ns.get_mut(self.current) {
            *slot = slot.saturating_add(elapsed);
        }
        self.last_sample_ns = now;
    }

    // READ-ONLY VIEW INCLUDING THE OPEN INTERVAL OF THE CURRENT LEVEL
    pub fn snapshot(&self, now: u64) -> Vec<u64> {
        let mut out = self.accumulated_ns.clone();
        if let Some(slot) = out.get_mut(self.current) {
            *slot = slot.saturating_add(now.saturating_sub(self.last_sample_ns));
        }
        out
    }

    pub fn reset(&mut self, now: u64) {
        self.accumulated_ns.iter_mut().for_each(|v| *v = 0);
        self.last_sample_ns = now;
    }

    pub fn current(&self) -> u32 {
        self.current as u32
    }
}

pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}
