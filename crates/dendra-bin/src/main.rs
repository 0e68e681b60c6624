//! Dendra entrypoint: a thin CLI over the simulator surface.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use core_sim::{ScenarioParams, Simulator};
use std::io::{self, BufReader};
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "dendra", version, about = "Self-assembling tree relay simulator")]
struct Args {
    /// Configuration file path (overrides discovery of `dendra.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Board file to start from; a random board is generated otherwise.
    #[arg(long = "board")]
    board: Option<PathBuf>,
    /// PRNG seed for board generation and source events.
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
    /// Depth budget for random board generation.
    #[arg(long, default_value_t = 4)]
    depth: i32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run automatic simulation with random source churn.
    Auto {
        #[arg(long, default_value_t = 100)]
        steps: u32,
        #[arg(long, default_value_t = 5)]
        min_power: i32,
        #[arg(long, default_value_t = 30)]
        max_power: i32,
        /// CSV results path.
        #[arg(long)]
        results: Option<PathBuf>,
    },
    /// Drive the simulation interactively from stdin.
    Step {
        /// Suppress the helper prompts.
        #[arg(long)]
        quiet: bool,
    },
    /// Print the current board and exit.
    Print,
    /// Save the (generated or loaded) board to a file and exit.
    Save { path: PathBuf },
    /// Compare reconfigurable against static flow over random scenarios.
    Scenario {
        init_file: PathBuf,
        #[arg(long, default_value_t = 5)]
        num_scenarios: u32,
        #[arg(long, default_value_t = 10)]
        sample_count: u32,
        #[arg(long, default_value_t = 5)]
        sample_ticks: u32,
        #[arg(long, default_value_t = 10)]
        ticks_between_events: u32,
        #[arg(long, default_value_t = 3)]
        ticks_to_reconfigure_root: u32,
    },
}

fn configure_logging() -> Result<WorkerGuard> {
    let appender = tracing_appender::rolling::never(".", "dendra.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn main() -> Result<()> {
    let _log_guard = configure_logging()?;
    let args = Args::parse();
    info!(target: "runtime", "startup");

    let config = core_config::load_from(args.config.clone()).context("loading configuration")?;
    let mut sim = Simulator::with_seed(config, args.seed);

    match &args.board {
        Some(path) => sim
            .initialize_from_file(path)
            .with_context(|| format!("initializing from {}", path.display()))?,
        None => {
            sim.initialize_random(args.depth);
        }
    }

    match args.command {
        Command::Auto {
            steps,
            min_power,
            max_power,
            results,
        } => {
            sim.auto_simulate(steps, min_power, max_power, results.as_deref())?;
            sim.print_board(&mut io::stdout().lock())?;
        }
        Command::Step { quiet } => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            sim.do_step_by_step(BufReader::new(stdin.lock()), stdout.lock(), !quiet)?;
        }
        Command::Print => {
            sim.print_board(&mut io::stdout().lock())?;
        }
        Command::Save { path } => {
            sim.save_board(&path)?;
        }
        Command::Scenario {
            init_file,
            num_scenarios,
            sample_count,
            sample_ticks,
            ticks_between_events,
            ticks_to_reconfigure_root,
        } => {
            let params = ScenarioParams {
                num_scenarios,
                sample_count,
                sample_ticks,
                ticks_between_events,
                ticks_to_reconfigure_root,
            };
            sim.simulate_optimal_vs_random_flow(&init_file, params, &mut io::stdout().lock())?;
        }
    }

    info!(target: "runtime", "shutdown");
    Ok(())
}
