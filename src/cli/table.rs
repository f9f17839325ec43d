use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct TableArgs {
    // TABLE FILE (PLAIN OR .gz). BUILT-IN TABLE WHEN OMITTED.
    #[arg(long)]
    file: Option<PathBuf>,

    // ADD THIS MARGIN TO EVERY PRINTED VOLTAGE
    #[arg(long, default_value_t = 0)]
    margin_uv: u32,
}

pub fn run_table(args: TableArgs) -> Result<()> {
    let table = super::load_table(args.file.as_deref())?;

    println!("GPU-DVFS PERFORMANCE TABLE ({} LEVELS)", table.len());
    println!();
    println!("{:<4} {:>10} {:>11} {:>4} {:>5} {:>5} {:>10} {:>10} {:>10}",
        "IDX", "CLOCK_KHZ", "VOLT_UV", "UP", "DOWN", "STAY", "MEM_KHZ", "INT_KHZ", "CPU_KHZ");
    println!("{}", "-".repeat(78));

    let mut warnings = 0;
    for l in table.iter() {
        println!("{:<4} {:>10} {:>11} {:>4} {:>5} {:>5} {:>10} {:>10} {:>10}",
            l.index, l.clock_khz, l.voltage_uv.saturating_add(args.margin_uv),
            l.up_threshold, l.down_threshold, l.stay_count,
            l.mem_freq_hint, l.int_freq_hint, l.cpu_freq_hint);

        // NOT FATAL: THE GOVERNOR COPES, BUT THE BAND IS INVERTED
        if l.index > 0 && l.up_threshold <= l.down_threshold {
            warnings += 1;
        }
    }
    println!();

    if warnings > 0 {
        println!("WARNING: {} LEVEL(S) WITH up <= down (NO HYSTERESIS BAND)", warnings);
    } else {
        println!("TABLE OK");
    }
    Ok(())
}
