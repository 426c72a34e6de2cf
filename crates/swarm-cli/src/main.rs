//! `swarm-worker`: the headless process entry point for `swarm-core`.
//!
//! Owns everything the library intentionally leaves out (§1 Out of scope):
//! argument parsing, logging setup, and the task prototypes registered with
//! the runner. `std::process::exit` is called exactly once, here, after the
//! runner's async dispose sequence has run to completion.

mod demo_task;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use swarm_core::{PrototypeSet, Runner, TcpTransport, WorkerConfig};
use tracing_subscriber::EnvFilter;

use demo_task::{FlakyTask, SleepTask};

/// Coordinator-driven load-generation worker.
#[derive(Parser, Debug)]
#[command(name = "swarm-worker", about = "Worker process for a coordinator-driven load-generation swarm")]
struct Cli {
    /// Coordinator address.
    #[arg(long, default_value = "127.0.0.1")]
    master_host: String,

    /// Coordinator port.
    #[arg(long, default_value_t = 5557)]
    master_port: u16,

    /// Scheduler ring capacity; must be a power of two.
    #[arg(long, default_value_t = 32768)]
    buffer_size: usize,

    /// Scheduler worker-pool parallelism.
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Stats flush cadence, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    stat_interval: u64,

    /// Node-id determinism seed; `0` draws a random suffix.
    #[arg(long, default_value_t = 0)]
    random_seed: u64,

    /// Global requests/second ceiling across all virtual clients; `0` disables it.
    #[arg(long, default_value_t = 0.0)]
    max_rps: f64,

    /// Tracing filter directive (e.g. `debug`, `swarm_core=trace,info`).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    let config = match WorkerConfig::new(
        cli.master_host.clone(),
        cli.master_port,
        cli.buffer_size,
        cli.threads,
        Duration::from_millis(cli.stat_interval),
        cli.random_seed,
        cli.max_rps,
    ) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid worker configuration");
            std::process::exit(1);
        }
    };

    let transport = Arc::new(TcpTransport::new(config.master_host.clone(), config.master_port));
    let prototypes = PrototypeSet::new(vec![
        Box::new(SleepTask::new("demo/sleep", 3.0, 50, 250)),
        Box::new(FlakyTask::new("demo/flaky", 1.0, 15)),
    ]);
    let runner = Arc::new(Runner::new(config, transport, prototypes));

    tracing::info!(node_id = runner.node_id(), "worker starting");

    match runner.run().await {
        Ok(()) => {
            tracing::info!("worker exiting cleanly");
            std::process::exit(0);
        }
        Err(err) => {
            tracing::error!(error = %err, "worker exiting due to a fatal error");
            std::process::exit(1);
        }
    }
}
