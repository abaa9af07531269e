use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use tradesim::commands::{self, backtest, inspect, sweep, RunOptions};

#[derive(Parser)]
#[command(name = "tradesim")]
#[command(about = "Event-driven backtester for rolling-signal trading strategies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay one strategy over a market data file
    Backtest {
        #[command(flatten)]
        run: RunOptions,
        /// Write the full report as JSON
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Replay a grid of parameter values and/or seeds in parallel
    Sweep {
        #[command(flatten)]
        run: RunOptions,
        /// Parameter to vary, e.g. avgRange
        #[arg(long = "sweep-param")]
        sweep_param: Option<String>,
        /// Comma separated values for the swept parameter
        #[arg(long, value_delimiter = ',')]
        values: Vec<f64>,
        /// Comma separated seeds
        #[arg(long, value_delimiter = ',')]
        seeds: Vec<u64>,
        /// Number of best runs to log
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Write every run's summary as JSON
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Summarize the contents of a market data file
    Inspect {
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting tradesim. Simulated results only; past performance says little about the future.");

    match cli.command {
        Commands::Backtest { run, output } => {
            backtest::run(&run, output.as_deref())?;
        }
        Commands::Sweep {
            run,
            sweep_param,
            values,
            seeds,
            top,
            output,
        } => {
            let grid = sweep::SweepGrid {
                parameter: sweep_param.as_deref(),
                values: &values,
                seeds: &seeds,
            };
            sweep::run(&run, grid, top, output.as_deref())?;
        }
        Commands::Inspect { data_file } => {
            let path = data_file.unwrap_or_else(|| PathBuf::from(commands::DEFAULT_MARKET_DATA_FILE));
            inspect::run(&path)?;
        }
    }

    Ok(())
}
