// GPU-DVFS EVENT LOG
// RECORDS EVERY TRANSITION ATTEMPT (GOVERNOR OR FORCED)
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION IN THE CONTROL LOOP.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use crate::error::TransitionError;
use crate::time_in_state::now_ns;

pub const MAX_EVENTS: usize = 4096;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cause {
    Governor,
    Forced,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Outcome {
    Applied,
    SoftTimeout,
    NotPowered,
    Failed,
}

impl Outcome {
    pub fn from_result(result: &Result<(), TransitionError>) -> Self {
        match result {
            Ok(()) => Self::Applied,
            Err(TransitionError::StableTimeout { .. }) => Self::SoftTimeout,
            Err(TransitionError::DeviceNotPowered) => Self::NotPowered,
            Err(_) => Self::Failed,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Applied => "OK",
            Self::SoftTimeout => "UNSTABLE",
            Self::NotPowered => "GATED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TransitionEvent {
    pub ts_ns:       u64,
    pub from:        u32,
    pub to:          u32,
    pub utilization: u8,
    pub cause:       Cause,
    pub outcome:     Outcome,
}

const EMPTY_EVENT: TransitionEvent = TransitionEvent {
    ts_ns: 0,
    from: 0,
    to: 0,
    utilization: 0,
    cause: Cause::Governor,
    outcome: Outcome::Applied,
};

#[derive(Clone)]
pub struct EventLog {
    events: Vec<TransitionEvent>,
    head:   usize,
    len:    usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: vec![EMPTY_EVENT; MAX_EVENTS],
            head: 0,
            len: 0,
        }
    }

    // OVERWRITES OLDEST ENTRY WHEN FULL
    pub fn record(&mut self, from: u32, to: u32, utilization: u8, cause: Cause, outcome: Outcome) {
        self.events[self.head] = TransitionEvent {
            ts_ns: now_ns(),
            from,
            to,
            utilization,
            cause,
            outcome,
        };
        self.head = (self.head + 1) % MAX_EVENTS;
        if self.len < MAX_EVENTS {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // ITERATE EVENTS IN CHRONOLOGICAL ORDER
    pub fn iter_chronological(&self) -> impl Iterator<Item = &TransitionEvent> {
        let start = if self.len < MAX_EVENTS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.events[(start + i) % MAX_EVENTS]
        })
    }

    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let first = match iter.next() {
            Some(e) => e,
            None => return,
        };
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<6} {:<6} {:<6} {:<10} {:<10}",
            "TIME_S", "FROM", "TO", "UTIL", "CAUSE", "OUTCOME");
        println!("{}", "-".repeat(52));

        for e in std::iter::once(first).chain(iter) {
            let elapsed_s = (e.ts_ns - base_ts) as f64 / 1_000_000_000.0;
            println!("{:<10.3} {:<6} {:<6} {:<6} {:<10} {:<10}",
                elapsed_s, e.from, e.to, e.utilization,
                match e.cause { Cause::Governor => "GOVERNOR", Cause::Forced => "FORCED" },
                e.outcome.label());
        }

        if self.len == MAX_EVENTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} EVENTS)", MAX_EVENTS);
        }
        println!("TOTAL EVENTS: {}", self.len);
    }

    pub fn counts(&self) -> EventCounts {
        let mut c = EventCounts::default();
        for e in self.iter_chronological() {
            match e.outcome {
                Outcome::Applied => c.applied += 1,
                Outcome::SoftTimeout => c.soft_timeouts += 1,
                Outcome::NotPowered => c.not_powered += 1,
                Outcome::Failed => c.failed += 1,
            }
            if e.cause == Cause::Forced {
                c.forced += 1;
            }
            if e.to > e.from {
                c.up_steps += 1;
            } else if e.to < e.from {
                c.down_steps += 1;
            }
        }
        c
    }

    pub fn summary(&self) {
        if self.len == 0 {
            return;
        }

        let c = self.counts();
        let events: Vec<&TransitionEvent> = self.iter_chronological().collect();
        let elapsed_ns = match (events.first(), events.last()) {
            (Some(a), Some(b)) => b.ts_ns - a.ts_ns,
            _ => 0,
        };
        let elapsed_s = elapsed_ns as f64 / 1_000_000_000.0;

        println!("\n{}", "=".repeat(50));
        println!("GPU-DVFS TRANSITION SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  APPLIED:           {}", c.applied);
        println!("  UNSTABLE (SOFT):   {}", c.soft_timeouts);
        println!("  POWER GATED:       {}", c.not_powered);
        println!("  FAILED:            {}", c.failed);
        println!("  FORCED:            {}", c.forced);
        println!("  STEPS:             UP {} / DOWN {}", c.up_steps, c.down_steps);
        if elapsed_s > 0.0 {
            println!("  TRANSITIONS/S:     {:.2}", self.len as f64 / elapsed_s);
        }
        println!("  ELAPSED:           {:.1}s", elapsed_s);
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub struct EventCounts {
    pub applied: u64,
    pub soft_timeouts: u64,
    pub not_powered: u64,
    pub failed: u64,
    pub forced: u64,
    pub up_steps: u64,
    pub down_steps: u64,
}
