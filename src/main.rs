//! Workshop simulator CLI
//!
//! Connects to the control server, runs the pipeline once and prints the
//! event log followed by a summary on stdout. Diagnostics go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufReader};
use std::thread;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use workshop_pipeline::{feed, CancelToken, Config, PipelineBuilder, StateCell};

#[derive(Parser, Debug)]
#[command(name = "workshop")]
#[command(about = "Run the four-phase workshop pipeline under an external control feed", long_about = None)]
struct Cli {
    /// Control server address
    #[arg(long, env = "WORKSHOP_SERVER_ADDR", default_value = "localhost:8000")]
    server_addr: String,

    /// Read control values from stdin instead of the server
    #[arg(long)]
    stdin_feed: bool,

    /// Items of class A
    #[arg(long, env = "WORKSHOP_NUM_A", default_value_t = 10)]
    num_a: usize,

    /// Items of class B
    #[arg(long, env = "WORKSHOP_NUM_B", default_value_t = 10)]
    num_b: usize,

    /// Items of class C
    #[arg(long, env = "WORKSHOP_NUM_C", default_value_t = 10)]
    num_c: usize,

    /// Workshop slots (phase 1 admission, held until exit)
    #[arg(long, env = "WORKSHOP_NUM_SLOTS", default_value_t = 6)]
    num_slots: usize,

    /// Mechanics in phase 2
    #[arg(long, env = "WORKSHOP_NUM_WORKERS_STAGE2", default_value_t = 3)]
    num_workers_stage2: usize,

    /// Per-class queue depth in front of phase 1
    #[arg(long, env = "WORKSHOP_MAX_QUEUE_DEPTH1", default_value_t = 20)]
    max_queue_depth1: usize,

    /// Per-class queue depth in front of phase 2
    #[arg(long, env = "WORKSHOP_MAX_QUEUE_DEPTH2", default_value_t = 20)]
    max_queue_depth2: usize,

    /// Per-class queue depth in front of phase 3
    #[arg(long, env = "WORKSHOP_MAX_QUEUE_DEPTH3", default_value_t = 20)]
    max_queue_depth3: usize,

    /// Per-class queue depth in front of phase 4
    #[arg(long, env = "WORKSHOP_MAX_QUEUE_DEPTH4", default_value_t = 20)]
    max_queue_depth4: usize,

    /// Cleaners in phase 3
    #[arg(long, env = "WORKSHOP_NUM_CLEANERS", default_value_t = 1)]
    num_cleaners: usize,

    /// Reviewers in phase 4
    #[arg(long, env = "WORKSHOP_NUM_REVIEWERS", default_value_t = 1)]
    num_reviewers: usize,

    /// Maximum extra whole seconds added to each service
    #[arg(long, env = "WORKSHOP_MAX_JITTER_SECONDS", default_value_t = 2)]
    max_jitter_seconds: u64,

    /// RNG seed (0 derives one from the clock)
    #[arg(long, env = "WORKSHOP_SEED", default_value_t = 0)]
    seed: u64,

    /// Length of one service second, in milliseconds (shrink to speed up runs)
    #[arg(long, env = "WORKSHOP_TIME_UNIT_MS", default_value_t = 1000)]
    time_unit_ms: u64,

    /// Keep phases 2-4 serving while the workshop is closed
    #[arg(long, env = "WORKSHOP_DRAIN_ON_CLOSE", default_value_t = true, action = clap::ArgAction::Set)]
    drain_on_close: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            server_addr: self.server_addr.clone(),
            num_a: self.num_a,
            num_b: self.num_b,
            num_c: self.num_c,
            num_slots: self.num_slots,
            num_workers_stage2: self.num_workers_stage2,
            num_cleaners: self.num_cleaners,
            num_reviewers: self.num_reviewers,
            max_queue_depth: [
                self.max_queue_depth1,
                self.max_queue_depth2,
                self.max_queue_depth3,
                self.max_queue_depth4,
            ],
            max_jitter_units: self.max_jitter_seconds,
            time_unit: Duration::from_millis(self.time_unit_ms),
            drain_on_close: self.drain_on_close,
            seed: self.seed,
            ..Config::default()
        }
    }
}

fn main() -> Result<()> {
    // Diagnostics on stderr; stdout carries the event log
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let pipeline = PipelineBuilder::new(config.clone())
        .build()
        .context("invalid configuration")?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, cancelling run");
        on_signal.cancel();
    })
    .context("failed to set signal handler")?;

    let cell = StateCell::spawn()?;
    let state = cell.handle();

    // The feed thread may sit in a blocking read; it is not joined.
    let feed_cancel = cancel.clone();
    if cli.stdin_feed {
        thread::Builder::new()
            .name("control-feed".into())
            .spawn(move || {
                let stdin = io::stdin();
                if let Err(e) = feed::run_feed(stdin.lock(), &state, &feed_cancel) {
                    tracing::error!(error = %e, "control feed failed");
                }
            })
            .context("failed to start control feed")?;
    } else {
        let stream = feed::connect(&config.server_addr)
            .with_context(|| format!("failed to connect to {}", config.server_addr))?;
        thread::Builder::new()
            .name("control-feed".into())
            .spawn(move || {
                if let Err(e) = feed::run_feed(BufReader::new(stream), &state, &feed_cancel) {
                    tracing::error!(error = %e, "control feed failed");
                }
            })
            .context("failed to start control feed")?;
    }

    println!("=== Workshop started ===");
    println!(
        "Configuration: slots={} mechanics={} A={} B={} C={}",
        config.num_slots, config.num_workers_stage2, config.num_a, config.num_b, config.num_c
    );

    let metrics = pipeline.run(&cell.handle(), &cancel)?;
    cancel.cancel();

    println!("=== Workshop finished ===");
    println!("{metrics}");

    Ok(())
}
