//! lamport-sim-core: Lamport-clocked message passing between simulated processes
//!
//! This library provides the core components for a group of processes that:
//! - Talk only over directed per-pair FIFO channels (no shared state)
//! - Order their events with one Lamport clock per process
//! - Run a banking protocol whose workers rebuild a gap-free balance history
//! - Run a request/reply/release mutual-exclusion protocol
//!
//! # Architecture
//!
//! Leaves first:
//! - `clock`: Lamport clock owned by each node
//! - `framing`: Envelope header serialization
//! - `message`: Tagged message variants and their payload codecs
//! - `transport`: In-process channel mesh
//! - `messaging`: Unicast, multicast, receive-from and receive-any
//! - `ledger`: Balance history reconstruction
//! - `events`: Protocol event records and pluggable sinks
//! - `node`: One participant (clock + messaging + event sink)
//! - `bank`: Coordinator and worker state machines of the banking protocol
//! - `mutex`: Critical-section protocol
//! - `metrics`: Per-node message counters
//!
//! # Design Principles
//!
//! - **No panics**: Protocol violations and transport failures are returned as errors
//! - **No globals**: Every node owns its clock; nothing is process-wide
//! - **Bounded channels**: A full channel blocks the sender instead of growing
//! - **Deterministic scans**: Receive-any always polls peers in ascending id order

pub mod bank;
pub mod clock;
pub mod error;
pub mod events;
pub mod framing;
pub mod ledger;
pub mod message;
pub mod messaging;
pub mod metrics;
pub mod mutex;
pub mod node;
pub mod transport;

// Re-export commonly used types
pub use error::{Error, Result};

/// Participant id. The coordinator is 0, workers are 1..=N.
pub type ProcessId = u8;

/// Lamport clock value.
pub type Timestamp = i32;

/// Amount of money.
pub type Balance = i32;

/// Id of the coordinator.
pub const COORDINATOR: ProcessId = 0;

/// Most workers one run can have (16 participants including the coordinator).
pub const MAX_WORKERS: usize = 15;
