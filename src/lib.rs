// GPU-DVFS LIBRARY CRATE
// CLOSED-LOOP GPU FREQUENCY/VOLTAGE GOVERNOR + ORDERED HARDWARE TRANSITION ENGINE
//
// PURE-RUST. HARDWARE IS REACHED ONLY THROUGH THE TRAITS IN hw.rs.
// THE BINARY (main.rs) DRIVES IT AGAINST THE SIMULATED BACK END IN sim.rs.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { log::info!($($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { log::warn!($($arg)*) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod governor;
pub mod hw;
pub mod poll;
pub mod sampler;
pub mod sim;
pub mod table;
pub mod time_in_state;
pub mod transition;

pub use config::DvfsConfig;
pub use controller::{DvfsController, DvfsStatus, TickOutcome};
pub use error::{DvfsError, TableError, TransitionError};
pub use governor::{Governor, GovernorState, LockBound, LockOwner};
pub use hw::{ClockId, Hardware, HintKind};
pub use sampler::UtilizationSampler;
pub use table::{LevelSpec, PerformanceLevel, PerformanceTable};
pub use transition::{TransitionEngine, TransitionRequest};
