//! Lamport logical clock.
//!
//! Every node owns exactly one [`Clock`]; nothing about it is global, so a
//! whole group of nodes can live in one test process.
//!
//! # Rules
//!
//! - `tick` before every local event that other nodes will see
//! - `observe` a remote timestamp on receipt, then `tick` once the message's
//!   effect is accepted (`observe` alone never moves past an equal value)

use crate::Timestamp;

/// Process-local monotonic logical clock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clock {
    time: Timestamp,
}

impl Clock {
    /// Create a clock at time 0.
    pub fn new() -> Self {
        Self { time: 0 }
    }

    /// Create a clock already advanced to `time`.
    ///
    /// Negative values are clamped to 0.
    pub fn starting_at(time: Timestamp) -> Self {
        Self { time: time.max(0) }
    }

    /// Advance the clock by one and return the new value.
    pub fn tick(&mut self) -> Timestamp {
        self.time += 1;
        self.time
    }

    /// Move the clock forward to `remote` if it is ahead; never moves back.
    pub fn observe(&mut self, remote: Timestamp) -> Timestamp {
        if remote > self.time {
            self.time = remote;
        }
        self.time
    }

    /// Lamport receive rule: `observe(remote)` followed by `tick()`.
    pub fn receive(&mut self, remote: Timestamp) -> Timestamp {
        self.observe(remote);
        self.tick()
    }

    /// Current value without mutation.
    pub fn current_time(&self) -> Timestamp {
        self.time
    }
}
