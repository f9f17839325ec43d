// GPU-DVFS v1.2.0 -- CLOSED-LOOP GPU FREQUENCY/VOLTAGE GOVERNOR
// UTILIZATION-DRIVEN LEVEL STEPPING WITH ORDERED CLOCK/VOLTAGE TRANSITIONS
//
// THE GOVERNOR AND TRANSITION ENGINE LIVE IN THE LIBRARY.
// THIS BINARY DRIVES THEM AGAINST A SIMULATED BOARD: CONFIGURATION,
// LOAD GENERATION, MONITORING, REPORTING.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gpu-dvfs")]
#[command(about = "GPU-DVFS -- CLOSED-LOOP GPU FREQUENCY GOVERNOR")]
struct Cli {
    // DEBUG LOGGING (RUST_LOG STILL WINS WHEN SET)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    // RUN THE GOVERNOR AGAINST THE SIMULATED BOARD
    Run(cli::run::RunArgs),
    // PRINT AND VALIDATE A PERFORMANCE TABLE
    Table(cli::table::TableArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    match cli.command {
        Command::Run(args) => cli::run::run(args),
        Command::Table(args) => cli::table::run_table(args),
    }
}
