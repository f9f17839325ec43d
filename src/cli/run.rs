// SIMULATOR: CONTROLLER + SIMULATED BOARD + SYNTHETIC LOAD
//
// METRICS THREAD: EVERY --metrics-ms, TURNS DEMAND INTO BUSY/IDLE TICKS
//                 FOR THE CLOCK THE BOARD IS RUNNING AT, FEEDS THE SAMPLER.
// GOVERNOR WORKER: OWNED BY THE CONTROLLER (enable/disable).
// MAIN THREAD:    ONE STATUS LINE PER SECOND UNTIL CTRL+C OR --duration.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};

use gpu_dvfs::config::{DEFAULT_INTERVAL_MS, DEFAULT_SAMPLES_PER_WINDOW, DEFAULT_STATIC_PERIOD_TICKS};
use gpu_dvfs::sim::{busy_idle, LoadPattern, SimBoard};
use gpu_dvfs::{DvfsConfig, DvfsController, DvfsStatus, Governor, LockBound, LockOwner};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Clone, Copy, ValueEnum)]
pub enum GovernorArg {
    Utilization,
    Static,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PatternArg {
    Constant,
    Wave,
}

#[derive(Args)]
pub struct RunArgs {
    // TABLE FILE (PLAIN OR .gz). BUILT-IN TABLE WHEN OMITTED.
    #[arg(long)]
    table: Option<PathBuf>,

    // GOVERNOR TICK IN MILLISECONDS
    #[arg(long, default_value_t = DEFAULT_INTERVAL_MS)]
    interval_ms: u64,

    // METRICS CALLBACKS PER UTILIZATION WINDOW
    #[arg(long, default_value_t = DEFAULT_SAMPLES_PER_WINDOW)]
    window: u32,

    // METRICS CALLBACK PERIOD IN MILLISECONDS
    #[arg(long, default_value_t = 20)]
    metrics_ms: u64,

    #[arg(long, value_enum, default_value_t = GovernorArg::Utilization)]
    governor: GovernorArg,

    // STATIC GOVERNOR: TICKS PER STEP
    #[arg(long, default_value_t = DEFAULT_STATIC_PERIOD_TICKS)]
    static_period: u32,

    // PEAK DEMAND AS % OF THE TOP LEVEL CLOCK
    #[arg(long, default_value_t = 50)]
    load: u32,

    #[arg(long, value_enum, default_value_t = PatternArg::Constant)]
    pattern: PatternArg,

    // WAVE PATTERN: SECONDS PER FULL CYCLE
    #[arg(long, default_value_t = 20)]
    wave_period_s: u64,

    // STOP AFTER N SECONDS (RUNS UNTIL CTRL+C WHEN OMITTED)
    #[arg(long)]
    duration: Option<u64>,

    #[arg(long, default_value_t = 0)]
    margin_uv: u32,

    #[arg(long)]
    max_voltage_uv: Option<u32>,

    // RAIL VOLTAGE REQUIRED WHILE THE MUX SITS ON THE OSCILLATOR
    #[arg(long)]
    bypass_voltage_uv: Option<u32>,

    // RETUNE THE PLL IN PLACE, WITHOUT PARKING THE MUX
    #[arg(long)]
    no_reparent: bool,

    // is_stable() POLLS BEFORE THE SIMULATED PLL SETTLES
    #[arg(long, default_value_t = 3)]
    settle_polls: u32,

    // THERMAL CAP, IN kHz (MAX LOCK AT OR BELOW THIS CLOCK)
    #[arg(long)]
    thermal_cap_khz: Option<u32>,

    // SYSFS-STYLE INDEX LOCKS
    #[arg(long)]
    min_level: Option<u32>,

    #[arg(long)]
    max_level: Option<u32>,

    // DUMP FULL TRANSITION LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

pub fn run(args: RunArgs) -> Result<()> {
    if args.metrics_ms == 0 {
        bail!("--metrics-ms MUST BE AT LEAST 1");
    }

    let table = super::load_table(args.table.as_deref())?;
    let boot = *table.level(0);
    let top_khz = table.level(table.max_index()).clock_khz;

    let board = SimBoard::new(boot.clock_khz, boot.voltage_uv);
    board.set_settle_polls(args.settle_polls);

    let config = DvfsConfig {
        interval: Duration::from_millis(args.interval_ms),
        samples_per_window: args.window,
        voltage_margin_uv: args.margin_uv,
        max_voltage_uv: args.max_voltage_uv,
        bypass_voltage_uv: args.bypass_voltage_uv,
        reparent_on_relock: !args.no_reparent,
        governor: match args.governor {
            GovernorArg::Utilization => Governor::Utilization,
            GovernorArg::Static => Governor::StaticPingPong { period_ticks: args.static_period },
        },
        ..DvfsConfig::default()
    };

    let peak_khz = (top_khz as u64 * args.load as u64 / 100) as u32;
    let samples_per_cycle = (args.wave_period_s * 1000 / args.metrics_ms).max(2) as u32;
    let pattern = match args.pattern {
        PatternArg::Constant => LoadPattern::Constant { demand_khz: peak_khz },
        PatternArg::Wave => LoadPattern::Wave {
            low_khz: boot.clock_khz / 4,
            high_khz: peak_khz,
            period: samples_per_cycle,
        },
    };

    let levels = table.len();
    let ctl = DvfsController::init(table, boot.clock_khz, board.hardware(), config)?;

    if let Some(i) = args.min_level {
        ctl.set_lock(LockOwner::Sysfs, LockBound::Min, i)?;
    }
    if let Some(i) = args.max_level {
        ctl.set_lock(LockOwner::Sysfs, LockBound::Max, i)?;
    }
    if let Some(khz) = args.thermal_cap_khz {
        ctl.set_lock_clock(LockOwner::Thermal, LockBound::Max, khz)?;
    }

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    println!("GPU-DVFS v1.2.0 (SIMULATED BOARD)");
    println!("LEVELS:          {} ({} .. {} kHz)", levels, boot.clock_khz, top_khz);
    println!("GOVERNOR:        {}", config_label(&ctl.status()));
    println!("TICK:            {} ms (window={}, metrics={} ms)",
             args.interval_ms, args.window, args.metrics_ms);
    println!("LOAD:            {:?}", pattern);
    println!();

    // METRICS THREAD
    let metrics_stop = Arc::new(AtomicBool::new(false));
    let metrics = {
        let stop = Arc::clone(&metrics_stop);
        let board = Arc::clone(&board);
        let sampler = ctl.sampler();
        let period = Duration::from_millis(args.metrics_ms);
        let period_ticks = args.metrics_ms * 1000;
        std::thread::spawn(move || {
            let mut n: u64 = 0;
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(period);
                let (busy, idle) = busy_idle(pattern.demand_at(n), board.clock_khz(), period_ticks);
                sampler.record_busy_idle(busy, idle);
                n += 1;
            }
        })
    };

    ctl.enable(ctl.default_interval())?;
    println!("GPU-DVFS IS ACTIVE (CTRL+C TO EXIT)");

    let started = Instant::now();
    while !SHUTDOWN.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_secs(1));
        print_status(&ctl.status(), board.voltage_uv());

        if let Some(limit) = args.duration {
            if started.elapsed() >= Duration::from_secs(limit) {
                break;
            }
        }
    }

    println!("GPU-DVFS IS SHUTTING DOWN");
    metrics_stop.store(true, Ordering::Relaxed);
    if metrics.join().is_err() {
        gpu_dvfs::log_warn!("METRICS THREAD PANICKED");
    }
    ctl.disable();

    print_time_in_state(&ctl.time_in_state());
    ctl.with_event_log(|log| {
        if args.dump_log {
            log.dump();
        }
        log.summary();
    });

    println!("GPU-DVFS OUT.");
    Ok(())
}

fn config_label(s: &DvfsStatus) -> String {
    match s.governor {
        Governor::Utilization => "UTILIZATION (HYSTERESIS)".to_string(),
        Governor::StaticPingPong { period_ticks } => format!("STATIC PING-PONG (EVERY {} TICKS)", period_ticks),
    }
}

fn print_status(s: &DvfsStatus, rail_uv: u32) {
    let lock = |l: Option<u32>| l.map_or("-".to_string(), |i| i.to_string());
    println!(
        "clk: {:<7} kHz  rail: {:<8} uV  util: {:>3}%  level: {:<2} down: {:<2} lock: {}..{}{}",
        s.clock_khz, rail_uv, s.utilization, s.current_index, s.down_requirement,
        lock(s.min_lock), lock(s.max_lock),
        if s.suspended { " [GATED]" } else { "" },
    );
}

fn print_time_in_state(tis: &[(u32, u64)]) {
    let total: u64 = tis.iter().map(|(_, ns)| ns).sum();
    println!("\n{:<12} {:>12} {:>8}", "CLOCK_KHZ", "TIME_MS", "SHARE");
    println!("{}", "-".repeat(34));
    for (khz, ns) in tis {
        let share = if total > 0 { *ns as f64 * 100.0 / total as f64 } else { 0.0 };
        println!("{:<12} {:>12} {:>7.1}%", khz, ns / 1_000_000, share);
    }
}
