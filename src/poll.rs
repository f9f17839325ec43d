// BOUNDED HARDWARE POLL
// REPLACES RAW `while (reg & busy) {}` LOOPS WITH A RETRY BUDGET.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

// UP TO max_attempts CALLS, delay APART. TRUE AS SOON AS THE PREDICATE
// HOLDS, FALSE ONCE THE BUDGET IS SPENT.
pub fn poll_until<F>(mut predicate: F, max_attempts: u32, delay: Duration) -> bool
where
    F: FnMut() -> bool,
{
    for attempt in 0..max_attempts {
        if predicate() {
            return true;
        }
        if attempt + 1 == max_attempts {
            break;
        }
        if delay.is_zero() {
            std::hint::spin_loop();
        } else {
            std::thread::sleep(delay);
        }
    }
    false
}
