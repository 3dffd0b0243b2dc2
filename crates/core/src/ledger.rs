//! Balance history reconstruction.
//!
//! A worker sees balance-affecting events in physical arrival order, but the
//! audit wants a dense array: one [`BalanceState`] for every logical
//! timestamp from 0 to the worker's final clock, inclusive. The [`Ledger`]
//! builds that array incrementally from checkpoints.
//!
//! # Checkpoint Algorithm
//!
//! `append_checkpoint` takes an amount, the timestamp of the message that
//! caused it, and two flags:
//!
//! 1. `curr = max(clock, msg_time)`, plus one when `inc` is set
//! 2. the clock observes `curr`
//! 3. when `fix` is set, `msg_time` moves back one tick so a credit's
//!    pending window starts at the sender's debit time
//! 4. every timestamp between the previous checkpoint and `curr` is filled
//!    with the previous balance
//! 5. a credit (`amount > 0`) marks `pending_in += amount` on every
//!    timestamp in `[msg_time, curr)`
//! 6. the amount is applied and `history[curr]` is written
//!
//! # Invariants
//!
//! - `entries[t].time == t` for every `t`
//! - `entries.len() == last checkpoint time + 1`
//! - balances are the running sum of applied deltas in timestamp order

use crate::clock::Clock;
use crate::{Balance, ProcessId, Timestamp};
use std::fmt;

/// Balance of one worker at one logical timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceState {
    /// Logical timestamp this entry describes
    pub time: Timestamp,

    /// Committed balance at `time`
    pub balance: Balance,

    /// Money already debited by a sender but not yet credited here
    pub pending_in: Balance,
}

/// Dense per-timestamp balance record of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceHistory {
    owner: ProcessId,
    entries: Vec<BalanceState>,
}

impl BalanceHistory {
    /// Create an empty history for `owner`.
    pub fn new(owner: ProcessId) -> Self {
        Self {
            owner,
            entries: Vec::new(),
        }
    }

    /// Rebuild a history from decoded entries.
    ///
    /// Fails with the index of the first entry whose time is not its
    /// position (a gap or an out-of-order entry).
    pub fn from_entries(owner: ProcessId, entries: Vec<BalanceState>) -> Result<Self, usize> {
        match entries
            .iter()
            .enumerate()
            .position(|(i, state)| state.time as i64 != i as i64)
        {
            Some(index) => Err(index),
            None => Ok(Self { owner, entries }),
        }
    }

    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    pub fn entries(&self) -> &[BalanceState] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at timestamp `t`, if the history reaches it.
    pub fn at(&self, t: Timestamp) -> Option<&BalanceState> {
        usize::try_from(t).ok().and_then(|i| self.entries.get(i))
    }

    /// Entry at `t`, or the last entry when the history ends before `t`.
    ///
    /// A finished worker's balance stays frozen after its final checkpoint.
    pub fn at_or_last(&self, t: Timestamp) -> Option<&BalanceState> {
        self.at(t).or_else(|| self.entries.last())
    }

    /// Balance at the last recorded timestamp.
    pub fn final_balance(&self) -> Option<Balance> {
        self.entries.last().map(|s| s.balance)
    }

    /// Timestamp of the last recorded entry.
    pub fn last_time(&self) -> Option<Timestamp> {
        self.entries.last().map(|s| s.time)
    }
}

/// Parameters of one `append_checkpoint` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Balance delta to apply (negative for a debit)
    pub amount: Balance,

    /// Timestamp carried by the message that caused this checkpoint
    pub msg_time: Timestamp,

    /// Advance one tick past `max(clock, msg_time)`
    pub inc: bool,

    /// Start the pending window one tick before `msg_time`
    pub fix: bool,
}

impl Checkpoint {
    /// Record the starting balance at the current clock value.
    pub fn initial() -> Self {
        Self {
            amount: 0,
            msg_time: 0,
            inc: false,
            fix: false,
        }
    }

    /// Advance one tick with no balance change.
    pub fn advance() -> Self {
        Self {
            amount: 0,
            msg_time: 0,
            inc: true,
            fix: false,
        }
    }

    /// Catch up with a received message's timestamp, then advance one tick.
    pub fn sync_to(msg_time: Timestamp) -> Self {
        Self {
            amount: 0,
            msg_time,
            inc: true,
            fix: false,
        }
    }

    /// Outgoing transfer: debit `amount`.
    pub fn debit(amount: Balance, msg_time: Timestamp) -> Self {
        Self {
            amount: -amount,
            msg_time,
            inc: true,
            fix: false,
        }
    }

    /// Incoming transfer: credit `amount`, pending since the sender's debit.
    pub fn credit(amount: Balance, msg_time: Timestamp) -> Self {
        Self {
            amount,
            msg_time,
            inc: true,
            fix: true,
        }
    }
}

/// A worker's balance plus its reconstructed history.
#[derive(Debug, Clone)]
pub struct Ledger {
    balance: Balance,
    history: BalanceHistory,
}

impl Ledger {
    /// Create a ledger with an empty history.
    ///
    /// Call `append_checkpoint(clock, Checkpoint::initial())` to record the
    /// starting balance at `history[0]`.
    pub fn new(owner: ProcessId, initial_balance: Balance) -> Self {
        Self {
            balance: initial_balance,
            history: BalanceHistory::new(owner),
        }
    }

    /// Current committed balance.
    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn history(&self) -> &BalanceHistory {
        &self.history
    }

    /// Freeze the ledger and hand out its history.
    pub fn into_history(self) -> BalanceHistory {
        self.history
    }

    /// Append one checkpoint and return the timestamp it was written at.
    ///
    /// The clock is only ever moved forward.
    pub fn append_checkpoint(&mut self, clock: &mut Clock, checkpoint: Checkpoint) -> Timestamp {
        let Checkpoint {
            amount,
            mut msg_time,
            inc,
            fix,
        } = checkpoint;

        // Step 1: pick the timestamp this checkpoint lands on
        let mut curr = clock.current_time().max(msg_time);
        if inc {
            curr += 1;
        }
        if let Some(prev) = self.history.last_time() {
            curr = curr.max(prev);
        }

        // Step 2: clamp the clock forward
        clock.observe(curr);

        // Step 3: pending window starts at the sender's debit time
        if fix {
            msg_time -= 1;
        }

        // Step 4: carry the previous balance across the gap
        let curr_index = to_index(curr);
        let entries = &mut self.history.entries;
        for t in entries.len()..curr_index {
            entries.push(BalanceState {
                time: t as Timestamp,
                balance: self.balance,
                pending_in: 0,
            });
        }

        // Step 5: money in flight toward us
        if amount > 0 {
            for state in &mut entries[to_index(msg_time)..curr_index] {
                state.pending_in += amount;
            }
        }

        // Step 6: apply and record
        self.balance += amount;
        if curr_index < entries.len() {
            let slot = &mut entries[curr_index];
            slot.balance = self.balance;
        } else {
            entries.push(BalanceState {
                time: curr,
                balance: self.balance,
                pending_in: 0,
            });
        }

        curr
    }
}

fn to_index(t: Timestamp) -> usize {
    usize::try_from(t).unwrap_or(0)
}

/// Histories of every worker, collected by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllHistory {
    histories: Vec<BalanceHistory>,
}

impl AllHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one worker's history, keeping the set ordered by owner id.
    pub fn insert(&mut self, history: BalanceHistory) {
        let pos = self
            .histories
            .binary_search_by_key(&history.owner(), |h| h.owner())
            .unwrap_or_else(|p| p);
        self.histories.insert(pos, history);
    }

    pub fn histories(&self) -> &[BalanceHistory] {
        &self.histories
    }

    pub fn get(&self, owner: ProcessId) -> Option<&BalanceHistory> {
        self.histories.iter().find(|h| h.owner() == owner)
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Latest timestamp recorded by any worker.
    pub fn max_time(&self) -> Timestamp {
        self.histories
            .iter()
            .filter_map(|h| h.last_time())
            .max()
            .unwrap_or(0)
    }

    /// Sum of final balances across all workers.
    pub fn total_final_balance(&self) -> Balance {
        self.histories.iter().filter_map(|h| h.final_balance()).sum()
    }

    /// Money in the system at `t`: every balance plus every pending credit.
    pub fn total_at(&self, t: Timestamp) -> Balance {
        self.histories
            .iter()
            .filter_map(|h| h.at_or_last(t))
            .map(|s| s.balance + s.pending_in)
            .sum()
    }

    /// First timestamp where the money in the system differs from `expected`.
    pub fn check_conservation(&self, expected: Balance) -> Option<Timestamp> {
        (0..=self.max_time()).find(|&t| self.total_at(t) != expected)
    }
}

impl fmt::Display for AllHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let max_time = self.max_time();

        writeln!(f, "Full balance history for time range [0;{}]", max_time)?;
        write!(f, "{:>6} |", "t")?;
        for h in &self.histories {
            write!(f, " {:>13} |", format!("process {}", h.owner()))?;
        }
        writeln!(f, " {:>7}", "total")?;

        for t in 0..=max_time {
            write!(f, "{:>6} |", t)?;
            for h in &self.histories {
                match h.at_or_last(t) {
                    Some(s) if s.pending_in != 0 => {
                        write!(f, " {:>6} (+{:>4}) |", s.balance, s.pending_in)?
                    }
                    Some(s) => write!(f, " {:>13} |", s.balance)?,
                    None => write!(f, " {:>13} |", "-")?,
                }
            }
            writeln!(f, " {:>7}", self.total_at(t))?;
        }

        Ok(())
    }
}
