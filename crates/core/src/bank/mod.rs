//! Banking protocol.
//!
//! The coordinator (id 0) orders transfers between workers (ids 1..=N); the
//! workers apply them and rebuild their balance history for audit.
//!
//! # Transfer Path
//!
//! ```text
//! coordinator --Transfer--> src --Transfer--> dst --Ack--> coordinator
//! ```
//!
//! The destination acknowledges to the coordinator, not to the source, so
//! the coordinator is the one that blocks while a transfer is in flight.
//! Exactly one transfer is in flight at a time.
//!
//! # Phases
//!
//! - Coordinator: wait started, issue transfers, send stop, wait done,
//!   collect histories
//! - Worker: announce started, serve transfers until stopped and every peer
//!   is done, ship the history

mod coordinator;
mod driver;
mod worker;

pub use coordinator::run_coordinator;
pub use driver::{Teller, TransferDriver};
pub use worker::run_worker;
