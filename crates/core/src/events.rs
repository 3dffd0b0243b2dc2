//! Protocol event records and the sinks that consume them.
//!
//! The core never decides where event records go. Every node is handed an
//! [`EventSink`] and writes `(logical time, process, event)` records to it;
//! formatting and destination belong to the sink.

use crate::{Balance, ProcessId, Timestamp};
use std::fmt;
use std::sync::{Arc, Mutex};

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// The process announced itself
    Started {
        os_pid: u32,
        parent_pid: u32,
        balance: Balance,
    },

    /// Every expected Started message arrived
    ReceivedAllStarted,

    /// The process finished its own work
    Done { balance: Balance },

    /// Every expected Done message arrived
    ReceivedAllDone,

    /// Money left the record's process toward `dst`
    TransferOut { dst: ProcessId, amount: Balance },

    /// Money from `src` arrived at the record's process
    TransferIn { src: ProcessId, amount: Balance },

    /// One step of the critical-section workload
    LoopOperation { iteration: u32, total: u32 },
}

/// One event, stamped with the emitting node's logical time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub time: Timestamp,
    pub process: ProcessId,
    pub kind: EventKind,
}

impl EventRecord {
    pub fn new(time: Timestamp, process: ProcessId, kind: EventKind) -> Self {
        Self {
            time,
            process,
            kind,
        }
    }

    /// Short stable name of the event kind.
    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::Started { .. } => "started",
            EventKind::ReceivedAllStarted => "received_all_started",
            EventKind::Done { .. } => "done",
            EventKind::ReceivedAllDone => "received_all_done",
            EventKind::TransferOut { .. } => "transfer_out",
            EventKind::TransferIn { .. } => "transfer_in",
            EventKind::LoopOperation { .. } => "loop_operation",
        }
    }
}

/// Classic one-line text form of each event.
impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (t, id) = (self.time, self.process);
        match &self.kind {
            EventKind::Started {
                os_pid,
                parent_pid,
                balance,
            } => write!(
                f,
                "{}: process {} (pid {:5}, parent {:5}) has STARTED with balance ${:2}",
                t, id, os_pid, parent_pid, balance
            ),
            EventKind::ReceivedAllStarted => {
                write!(f, "{}: process {} received all STARTED messages", t, id)
            }
            EventKind::Done { balance } => {
                write!(f, "{}: process {} has DONE with balance ${:2}", t, id, balance)
            }
            EventKind::ReceivedAllDone => {
                write!(f, "{}: process {} received all DONE messages", t, id)
            }
            EventKind::TransferOut { dst, amount } => write!(
                f,
                "{}: process {} transferred ${:2} to process {}",
                t, id, amount, dst
            ),
            EventKind::TransferIn { src, amount } => write!(
                f,
                "{}: process {} received ${:2} from process {}",
                t, id, amount, src
            ),
            EventKind::LoopOperation { iteration, total } => write!(
                f,
                "process {} is doing {} iteration out of {}",
                id, iteration, total
            ),
        }
    }
}

/// Destination for event records.
///
/// Shared by every node of a run, possibly across threads.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &EventRecord);
}

/// Emits records as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &EventRecord) {
        tracing::info!(
            target: "lamport_sim::events",
            time = event.time,
            process = event.process,
            event = event.name(),
            "{}",
            event
        );
    }
}

/// Keeps every record in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<EventRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, in arrival order.
    pub fn events(&self) -> Vec<EventRecord> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Records emitted by one process.
    pub fn events_of(&self, process: ProcessId) -> Vec<EventRecord> {
        self.events()
            .into_iter()
            .filter(|e| e.process == process)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &EventRecord) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

/// Forwards every record to several sinks, in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn record(&self, event: &EventRecord) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
