//! lamport-sim: a coordinator and N workers on one channel mesh.
//!
//! Every process runs on its own thread with its own clock. Threads share
//! nothing but their channels and the event sink.
//!
//! # Exit Codes
//!
//! - `0`: success
//! - `-1`: invalid arguments
//! - `-2`: a process thread could not be started or panicked
//! - `-3`: a process failed with a protocol or transport error

mod config;
mod drivers;
mod sinks;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Cli, Config, Mode};
use lamport_sim_core::bank;
use lamport_sim_core::events::{EventSink, FanoutSink, TracingSink};
use lamport_sim_core::ledger::AllHistory;
use lamport_sim_core::metrics::NodeMetrics;
use lamport_sim_core::mutex;
use lamport_sim_core::node::Node;
use lamport_sim_core::transport::{Mesh, Transport};
use lamport_sim_core::{Balance, Error, ProcessId, COORDINATOR};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_INVALID_ARGS: i32 = -1;
const EXIT_SPAWN_FAILURE: i32 = -2;
const EXIT_NODE_FAILURE: i32 = -3;

/// Failures of the thread plumbing around the processes.
#[derive(Debug, thiserror::Error)]
enum SpawnError {
    #[error("failed to start process {id}: {source}")]
    Start { id: ProcessId, source: std::io::Error },

    #[error("process {0} panicked")]
    Panicked(ProcessId),
}

/// What one process thread hands back.
struct Outcome {
    metrics: NodeMetrics,
    report: Option<AllHistory>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            eprintln!("{}", e);
            std::process::exit(EXIT_INVALID_ARGS);
        }
        // --help and --version
        Err(e) => e.exit(),
    };

    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_INVALID_ARGS);
        }
    };

    if let Err(e) = init_tracing(config.log_level.as_deref()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(EXIT_INVALID_ARGS);
    }

    if config.print_config {
        config.print();
    }
    // Always print seed so runs can be replayed
    println!("Seed: {}", config.seed);

    if let Err(e) = run(&config) {
        error!("{:#}", e);
        let code = if e.downcast_ref::<SpawnError>().is_some() {
            EXIT_SPAWN_FAILURE
        } else {
            EXIT_NODE_FAILURE
        };
        std::process::exit(code);
    }
}

/// Install the stderr diagnostic logger.
///
/// `--log-level` wins over `RUST_LOG`, which wins over `info`.
fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Spawn every process, wait for all of them and print the results.
fn run(config: &Config) -> Result<()> {
    let ids: Vec<ProcessId> = (0..=config.workers as ProcessId).collect();

    let sink: Arc<dyn EventSink> = match &config.log_dir {
        Some(dir) => {
            sinks::write_pipes_log(dir, &ids, config.channel_capacity)
                .with_context(|| format!("writing {}", sinks::PIPES_LOG))?;
            let file = sinks::FileSink::create(dir)
                .with_context(|| format!("creating {}", sinks::EVENTS_LOG))?;
            Arc::new(
                FanoutSink::new()
                    .with(Arc::new(file))
                    .with(Arc::new(sinks::StdoutSink)),
            )
        }
        None => Arc::new(TracingSink),
    };

    info!(workers = config.workers, mode = ?config.mode, "starting");

    let endpoints = Mesh::full(&ids, config.channel_capacity);
    let mut handles = Vec::with_capacity(endpoints.len());

    for endpoint in endpoints {
        let id = endpoint.local_id();
        let mut node = Node::new(Box::new(endpoint), Arc::clone(&sink));
        let role = Role::for_process(config, id);

        let handle = thread::Builder::new()
            .name(format!("process-{}", id))
            .spawn(move || -> lamport_sim_core::Result<Outcome> {
                let report = role.run(&mut node)?;
                Ok(Outcome {
                    metrics: node.finish_metrics(),
                    report,
                })
            })
            .map_err(|source| SpawnError::Start { id, source })?;
        handles.push((id, handle));
    }

    // Join everyone before judging
    let mut outcomes = Vec::new();
    let mut failures = Vec::new();
    let mut panicked = None;
    for (id, handle) in handles {
        match handle.join() {
            Ok(Ok(outcome)) => outcomes.push(outcome),
            Ok(Err(e)) => {
                warn!(process = id, error = %e, "process failed");
                failures.push((id, e));
            }
            Err(_) => {
                panicked.get_or_insert(id);
            }
        }
    }
    if let Some(id) = panicked {
        return Err(SpawnError::Panicked(id).into());
    }
    if let Some((id, e)) = root_cause(failures) {
        return Err(anyhow::Error::new(e).context(format!("process {}", id)));
    }

    if let Some(dir) = &config.log_dir {
        let metrics: Vec<NodeMetrics> = outcomes.iter().map(|o| o.metrics.clone()).collect();
        sinks::write_metrics_log(dir, &metrics)
            .with_context(|| format!("writing {}", sinks::METRICS_LOG))?;
    }

    for outcome in &outcomes {
        if let Some(report) = &outcome.report {
            print_report(report, config.total_balance());
        }
    }

    if config.print_metrics {
        println!("=== Metrics ===");
        for outcome in &outcomes {
            print!("{}", outcome.metrics.summary());
        }
    }

    Ok(())
}

/// Pick the failure to report.
///
/// A process that fails tears down its channels, so its peers fail next with
/// `Error::Channel`. The first failure of any other kind is the cause.
fn root_cause(mut failures: Vec<(ProcessId, Error)>) -> Option<(ProcessId, Error)> {
    if failures.is_empty() {
        return None;
    }
    let pos = failures
        .iter()
        .position(|(_, e)| !matches!(e, Error::Channel(_)))
        .unwrap_or(0);
    Some(failures.swap_remove(pos))
}

/// Which state machine a process runs.
enum Role {
    BankCoordinator(Box<dyn bank::TransferDriver + Send>),
    BankWorker(Balance),
    MutexCoordinator,
    MutexWorker,
}

impl Role {
    fn for_process(config: &Config, id: ProcessId) -> Self {
        match (&config.mode, id) {
            (Mode::Bank(driver), COORDINATOR) => {
                Role::BankCoordinator(drivers::build(driver, config.seed, &config.balances))
            }
            (Mode::Bank(_), id) => Role::BankWorker(config.balances[id as usize - 1]),
            (Mode::Mutex, COORDINATOR) => Role::MutexCoordinator,
            (Mode::Mutex, _) => Role::MutexWorker,
        }
    }

    fn run(self, node: &mut Node) -> lamport_sim_core::Result<Option<AllHistory>> {
        match self {
            Role::BankCoordinator(mut driver) => {
                bank::run_coordinator(node, driver.as_mut()).map(Some)
            }
            Role::BankWorker(balance) => bank::run_worker(node, balance).map(|_| None),
            Role::MutexCoordinator => mutex::run_coordinator(node).map(|_| None),
            Role::MutexWorker => mutex::run_worker(node).map(|_| None),
        }
    }
}

fn print_report(report: &AllHistory, expected_total: Balance) {
    println!();
    print!("{}", report);

    match report.check_conservation(expected_total) {
        None => println!("Money conserved: {} at every timestamp", expected_total),
        Some(t) => {
            warn!(time = t, expected = expected_total, actual = report.total_at(t), "money not conserved");
            println!(
                "Money NOT conserved at t={}: expected {}, found {}",
                t,
                expected_total,
                report.total_at(t)
            );
        }
    }
    println!();
}
