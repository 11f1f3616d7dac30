mod pipelines;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use pipeq_logger::{Logger, LoggerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::pipelines::{PipelineOptions, Report};

#[derive(Parser)]
#[command(name = "pipeq")]
#[command(about = "pipeq - producer/consumer pipelines over concurrent FIFO queues", long_about = None)]
#[command(version)]
struct Cli {
    /// Logger configuration file (TOML); PIPEQ_LOGGER__* variables override it
    #[arg(short, long, global = true, env = "PIPEQ_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline over the bounded blocking queue
    Bounded(PipelineArgs),

    /// Run a pipeline over the lock-free queue
    LockFree(PipelineArgs),

    /// Run one producer and one consumer over the SPSC ring buffer
    Spsc(PipelineArgs),

    /// Run every pipeline and verify no value is lost or duplicated
    Stress {
        /// How many times to repeat the whole set
        #[arg(short, long, default_value = "10")]
        rounds: usize,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

#[derive(Args, Clone)]
struct PipelineArgs {
    /// Producer threads
    #[arg(short, long, default_value = "1")]
    producers: usize,

    /// Consumer threads
    #[arg(short = 'n', long, default_value = "5")]
    consumers: usize,

    /// Values pushed by each producer
    #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u32))]
    count: u32,

    /// Queue capacity (bounded queue and SPSC ring)
    #[arg(long, default_value = "64", value_parser = clap::value_parser!(u32).range(1..))]
    capacity: u32,

    /// Milliseconds each producer sleeps between pushes
    #[arg(long, default_value = "0")]
    work_ms: u64,

    /// Log every value, not just the summary
    #[arg(long)]
    trace_values: bool,
}

impl From<&PipelineArgs> for PipelineOptions {
    fn from(args: &PipelineArgs) -> Self {
        PipelineOptions {
            producers: args.producers.max(1),
            consumers: args.consumers.max(1),
            count: args.count as usize,
            capacity: args.capacity as usize,
            work: Duration::from_millis(args.work_ms),
            trace_values: args.trace_values,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "pipeq=debug,pipeq_logger=debug,pipeq_concurrent=trace" } else { "pipeq=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_report(report: &Report) {
    let status = if report.is_clean() { "ok".green() } else { "FAILED".red() };
    println!(
        "{} {:<18} {:>9} values  {:>10.2?}",
        status,
        report.queue.bold(),
        report.received,
        report.elapsed
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = LoggerConfig::load(cli.config.as_deref()).context("loading logger configuration")?;
    let logger = Arc::new(Logger::start(config).context("starting logger")?);

    let result = match &cli.command {
        Commands::Bounded(args) => pipelines::run_bounded(args.into(), &logger).map(|r| vec![r]),
        Commands::LockFree(args) => pipelines::run_lock_free(args.into(), &logger).map(|r| vec![r]),
        Commands::Spsc(args) => pipelines::run_spsc(args.into(), &logger).map(|r| vec![r]),
        Commands::Stress { rounds, pipeline } => {
            let opts = PipelineOptions::from(pipeline);
            (0..*rounds)
                .map(|_| {
                    Ok(vec![
                        pipelines::run_bounded(opts, &logger)?,
                        pipelines::run_lock_free(opts, &logger)?,
                        pipelines::run_spsc(opts, &logger)?,
                    ])
                })
                .collect::<Result<Vec<_>>>()
                .map(|rounds| rounds.into_iter().flatten().collect())
        }
    };

    let stats = logger.shutdown().context("shutting down logger")?;
    let reports = result?;
    for report in &reports {
        print_report(report);
    }
    if stats.dropped > 0 {
        println!("{} {} log messages dropped", "warn".yellow(), stats.dropped);
    }
    Ok(())
}
