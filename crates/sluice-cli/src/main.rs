//! Sluice command-line tool
//!
//! Drives the execution engine with synthetic tasklet loads:
//! run a batch, watch it finish, fail, or get cancelled, and print what the
//! engine did.

mod commands;
mod config;
mod logging;
mod synthetic;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Tasklet execution engine driver", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level (overrides SLUICE_LOG)
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one batch of synthetic tasklets
    Run {
        /// Number of cooperative tasklets
        #[arg(short = 'n', long, default_value_t = 16)]
        tasklets: usize,
        /// Steps each tasklet takes before it is done
        #[arg(short, long, default_value_t = 10_000)]
        steps: u64,
        /// Number of blocking tasklets
        #[arg(short, long, default_value_t = 0)]
        blocking: usize,
        /// Time a blocking tasklet blocks per step, in microseconds
        #[arg(long, default_value_t = 100)]
        block_us: u64,
        /// Make the first tasklet fail after this many steps
        #[arg(long)]
        fail_after: Option<u64>,
        /// Cancel the batch if it has not finished after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,
        /// Number of cooperative workers (overrides the config file)
        #[arg(short, long)]
        parallelism: Option<usize>,
    },

    /// Print the effective engine configuration
    Config {
        /// Number of cooperative workers (overrides the config file)
        #[arg(short, long)]
        parallelism: Option<usize>,
    },
}

/// Log verbosity accepted by `--log-level`
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level)?;

    match cli.command {
        Commands::Run {
            tasklets,
            steps,
            blocking,
            block_us,
            fail_after,
            cancel_after_ms,
            parallelism,
        } => {
            let engine = config::effective_config(cli.config.as_deref(), parallelism)?;
            let load = synthetic::LoadSpec {
                cooperative: tasklets,
                blocking,
                steps,
                block_time: std::time::Duration::from_micros(block_us),
                fail_after,
            };
            let cancel_after = cancel_after_ms.map(std::time::Duration::from_millis);
            commands::run::execute(engine, load, cancel_after).map(|outcome| outcome.exit_code())
        }

        Commands::Config { parallelism } => {
            let engine = config::effective_config(cli.config.as_deref(), parallelism)?;
            commands::config::execute(&engine, cli.config.as_deref());
            Ok(ExitCode::SUCCESS)
        }
    }
}
