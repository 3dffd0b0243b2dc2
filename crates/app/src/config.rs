//! Configuration for the lamport-sim application.
//!
//! Parses command-line arguments with clap and resolves them into a plain
//! [`Config`]. Anything random (the seed, random-driver defaults) is derived
//! from one seed that is always printed, so every run can be replayed.

use clap::{Parser, ValueEnum};
use lamport_sim_core::message::max_history_entries;
use lamport_sim_core::{Balance, Error, Result, MAX_WORKERS};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;

/// Smallest per-pair channel capacity accepted.
pub const MIN_CHANNEL_CAPACITY: usize = 4;

/// Logical ticks one transfer adds to every history: coordinator send,
/// source flush, debit and forward, destination flush and credit, Ack.
pub const TICKS_PER_TRANSFER: usize = 6;

/// Upper bound on the history length of a bank run with `transfers` orders.
///
/// Startup costs about one tick per worker and shutdown one more per
/// worker for the Done exchange.
pub fn history_len_bound(workers: usize, transfers: usize) -> usize {
    TICKS_PER_TRANSFER * transfers + 2 * workers + 8
}

/// Command-line surface.
#[derive(Parser, Debug, Clone)]
#[command(name = "lamport-sim")]
#[command(about = "Lamport-clocked bank transfers and mutual exclusion over an in-process channel mesh")]
pub struct Cli {
    /// Number of worker processes
    #[arg(short = 'p', long = "processes", value_name = "N")]
    pub processes: usize,

    /// Initial balance of each worker, in id order (optional with --mutexl)
    #[arg(value_name = "BALANCE", allow_negative_numbers = true)]
    pub balances: Vec<Balance>,

    /// Run the critical-section workload instead of the bank
    #[arg(long)]
    pub mutexl: bool,

    /// Transfer policy of the coordinator
    #[arg(long, value_enum, default_value_t = DriverKind::Robbery)]
    pub driver: DriverKind,

    /// Number of orders issued by the random driver (default: random)
    #[arg(long, value_name = "K")]
    pub transfers: Option<usize>,

    /// Largest single amount of the random driver (default: random)
    #[arg(long, value_name = "A")]
    pub max_amount: Option<Balance>,

    /// Random seed for determinism (default: time-based)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Frames buffered per directed channel before the sender blocks
    #[arg(long, default_value_t = 32)]
    pub channel_capacity: usize,

    /// Directory for events.log and pipes.log
    #[arg(long, default_value = ".")]
    pub log_dir: PathBuf,

    /// Don't write events.log and pipes.log
    #[arg(long)]
    pub no_log_files: bool,

    /// Print resolved configuration
    #[arg(long)]
    pub print_config: bool,

    /// Don't print per-process metrics
    #[arg(long)]
    pub no_metrics: bool,

    /// Diagnostic log filter (default: RUST_LOG, then "info")
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,
}

/// Which transfer policy the coordinator follows.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// i -> i+1 for every worker, then N -> 1
    Robbery,
    /// Seeded random orders that never overdraw
    Random,
}

/// Resolved transfer policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverConfig {
    Robbery,
    Random { transfers: usize, max_amount: Balance },
}

/// What the group runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Bank(DriverConfig),
    Mutex,
}

/// Complete configuration for a run.
#[derive(Debug, Clone)]
pub struct Config {
    // === Group ===
    /// Number of workers (ids 1..=workers)
    pub workers: usize,

    /// Initial balance per worker, index 0 is worker 1
    pub balances: Vec<Balance>,

    /// Protocol to run
    pub mode: Mode,

    /// Seed for every random choice
    pub seed: u64,

    // === Channels ===
    /// Capacity of each directed channel
    pub channel_capacity: usize,

    // === Output ===
    /// Where log files go (None = no files)
    pub log_dir: Option<PathBuf>,

    /// Explicit diagnostic log filter
    pub log_level: Option<String>,

    /// Whether to print detailed config
    pub print_config: bool,

    /// Whether to print per-process metrics
    pub print_metrics: bool,
}

impl Config {
    /// Validate parsed arguments and fill in defaults.
    ///
    /// # Errors
    /// `Error::Config` for a worker count outside `1..=MAX_WORKERS`, a
    /// balance list of the wrong length, a negative balance, a zero
    /// random-driver amount or a channel capacity below
    /// `MIN_CHANNEL_CAPACITY`.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let workers = cli.processes;
        if workers == 0 || workers > MAX_WORKERS {
            return Err(config_error(format!(
                "process count must be between 1 and {}, got {}",
                MAX_WORKERS, workers
            )));
        }

        // Balances are optional only for the critical-section workload
        let balances = if cli.balances.is_empty() && cli.mutexl {
            vec![0; workers]
        } else {
            cli.balances
        };
        if balances.len() != workers {
            return Err(config_error(format!(
                "expected {} balances, got {}",
                workers,
                balances.len()
            )));
        }
        if let Some(b) = balances.iter().find(|&&b| b < 0) {
            return Err(config_error(format!("balance must not be negative, got {}", b)));
        }

        if cli.channel_capacity < MIN_CHANNEL_CAPACITY {
            return Err(config_error(format!(
                "channel capacity must be at least {}, got {}",
                MIN_CHANNEL_CAPACITY, cli.channel_capacity
            )));
        }

        // Determine seed (explicit or time-based)
        let seed = cli.seed.unwrap_or_else(time_seed);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mode = if cli.mutexl {
            Mode::Mutex
        } else {
            match cli.driver {
                DriverKind::Robbery => Mode::Bank(DriverConfig::Robbery),
                DriverKind::Random => {
                    let max_amount = cli.max_amount.unwrap_or_else(|| rng.gen_range(1..=10));
                    if max_amount <= 0 {
                        return Err(config_error(format!(
                            "max amount must be positive, got {}",
                            max_amount
                        )));
                    }
                    let transfers = cli
                        .transfers
                        .unwrap_or_else(|| rng.gen_range(workers..=workers * 3));
                    // Every worker ships its history in one message
                    if history_len_bound(workers, transfers) > max_history_entries() {
                        return Err(config_error(format!(
                            "{} transfers between {} workers would outgrow the {}-entry history limit",
                            transfers,
                            workers,
                            max_history_entries()
                        )));
                    }
                    Mode::Bank(DriverConfig::Random {
                        transfers,
                        max_amount,
                    })
                }
            }
        };

        Ok(Config {
            workers,
            balances,
            mode,
            seed,
            channel_capacity: cli.channel_capacity,
            log_dir: (!cli.no_log_files).then_some(cli.log_dir),
            log_level: cli.log_level,
            print_config: cli.print_config,
            print_metrics: !cli.no_metrics,
        })
    }

    /// Money in the system, summed over every worker.
    pub fn total_balance(&self) -> Balance {
        self.balances.iter().sum()
    }

    /// Print the configuration in human-readable form.
    pub fn print(&self) {
        println!("=== Configuration ===");
        println!("Workers: {}", self.workers);
        println!("Balances: {:?} (total {})", self.balances, self.total_balance());
        match &self.mode {
            Mode::Bank(DriverConfig::Robbery) => println!("Mode: bank, robbery driver"),
            Mode::Bank(DriverConfig::Random {
                transfers,
                max_amount,
            }) => println!(
                "Mode: bank, random driver ({} transfers, at most {} each)",
                transfers, max_amount
            ),
            Mode::Mutex => println!("Mode: critical-section workload"),
        }
        println!("Seed: {}", self.seed);
        println!();
        println!("=== Channels ===");
        println!("Capacity: {} frames per direction", self.channel_capacity);
        match &self.log_dir {
            Some(dir) => println!("Log files: {}", dir.display()),
            None => println!("Log files: disabled"),
        }
        println!();
    }
}

fn config_error(message: String) -> Error {
    Error::Config(message)
}

fn time_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
