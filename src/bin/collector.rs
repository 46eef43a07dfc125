//! Collector node entrypoint.
//!
//! Invoked periodically by a scheduler. Each invocation takes the runner lock,
//! staggers, then fetches, signs and sends every configured feed once.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use collector_node::config::{env_template, write_env_template, Config};
use collector_node::feeds::read_feeds_file;
use collector_node::lock::{SingletonLock, RUNNER_LOCK_NAME};
use collector_node::pipeline::{Pipeline, RunSummary};
use collector_node::utils::init_logging;
use collector_node::Error;

#[derive(Debug, Parser)]
#[command(name = "collector-node", author, version, about = "Price collector node", long_about = None)]
struct Args {
    /// Feed definition file (JSON)
    #[arg(long, value_name = "FILE", required_unless_present_any = ["print_env_template", "write_env_template"])]
    feeds: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Optional TOML configuration file; environment variables still override it
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print a commented `validator.env` template to stdout and exit
    #[arg(long)]
    print_env_template: bool,

    /// Write a commented `validator.env` template to FILE and exit; never overwrites
    #[arg(long, value_name = "FILE")]
    write_env_template: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(if args.debug { "debug" } else { "info" });

    if args.print_env_template {
        print!("{}", env_template());
        return ExitCode::SUCCESS;
    }
    if let Some(path) = &args.write_env_template {
        return match write_env_template(path) {
            | Ok(()) => {
                info!("wrote env template to {}", path.display());
                ExitCode::SUCCESS
            }
            | Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let lock = match SingletonLock::try_acquire(RUNNER_LOCK_NAME) {
        | Ok(lock) => lock,
        | Err(Error::LockHeld(path)) => {
            info!("collector node is already running (lock: {})", path);
            return ExitCode::FAILURE;
        }
        | Err(e) => {
            error!("cannot acquire runner lock: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let started = Instant::now();
    info!("collector node {} (pid: {})", env!("CARGO_PKG_VERSION"), std::process::id());

    let code = match run(&args) {
        | Ok(summary) => {
            summary.log();
            ExitCode::SUCCESS
        }
        | Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    };
    info!("collector node completed in {:.2}s", started.elapsed().as_secs_f64());

    lock.release();
    code
}

fn run(args: &Args) -> Result<RunSummary> {
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    config.log_summary();

    let feeds_path = args.feeds.as_deref().context("--feeds is required")?;
    let feeds = read_feeds_file(feeds_path)
        .with_context(|| format!("Failed to read feeds from {}", feeds_path.display()))?;
    let pipeline = Pipeline::from_config(&config).context("Failed to set up collector")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let summary = runtime.block_on(pipeline.run(&feeds))?;
    Ok(summary)
}
