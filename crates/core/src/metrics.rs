//! Per-node message counters.
//!
//! Each node owns one [`NodeMetrics`], updated by its messaging layer. There
//! is exactly one writer, so nothing here is synchronized.

use crate::message::MessageKind;
use crate::ProcessId;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Message counts and wait counts for one node.
#[derive(Debug, Clone)]
pub struct NodeMetrics {
    /// Node these counters belong to
    pub process: ProcessId,

    /// When the node started
    pub start_time: Instant,

    /// When the node finished (set on completion)
    pub end_time: Option<Instant>,

    /// Envelopes written, by kind
    pub sent: BTreeMap<MessageKind, u64>,

    /// Envelopes read, by kind
    pub received: BTreeMap<MessageKind, u64>,

    /// Total bytes written (headers included)
    pub bytes_sent: u64,

    /// Total bytes read (headers included)
    pub bytes_received: u64,

    /// Sends that found the channel full and had to wait
    pub send_waits: u64,

    /// Receives that found nothing ready and had to wait
    pub receive_waits: u64,
}

impl NodeMetrics {
    /// Create new metrics with start time set to now.
    pub fn new(process: ProcessId) -> Self {
        Self {
            process,
            start_time: Instant::now(),
            end_time: None,
            sent: BTreeMap::new(),
            received: BTreeMap::new(),
            bytes_sent: 0,
            bytes_received: 0,
            send_waits: 0,
            receive_waits: 0,
        }
    }

    pub fn record_sent(&mut self, kind: MessageKind, bytes: usize) {
        *self.sent.entry(kind).or_insert(0) += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, kind: MessageKind, bytes: usize) {
        *self.received.entry(kind).or_insert(0) += 1;
        self.bytes_received += bytes as u64;
    }

    /// Mark the node as finished.
    pub fn complete(&mut self) {
        self.end_time = Some(Instant::now());
    }

    /// Get total duration (or current elapsed if not complete).
    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    pub fn total_sent(&self) -> u64 {
        self.sent.values().sum()
    }

    pub fn total_received(&self) -> u64 {
        self.received.values().sum()
    }

    pub fn sent_of(&self, kind: MessageKind) -> u64 {
        self.sent.get(&kind).copied().unwrap_or(0)
    }

    pub fn received_of(&self, kind: MessageKind) -> u64 {
        self.received.get(&kind).copied().unwrap_or(0)
    }

    /// Human-readable summary block.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "=== Process {} ===\n\
             Duration: {} ms\n\
             Sent: {} messages ({} bytes), {} waited on a full channel\n\
             Received: {} messages ({} bytes), {} waited on empty channels\n",
            self.process,
            self.duration().as_millis(),
            self.total_sent(),
            self.bytes_sent,
            self.send_waits,
            self.total_received(),
            self.bytes_received,
            self.receive_waits,
        );

        for kind in MessageKind::ALL {
            let (sent, received) = (self.sent_of(kind), self.received_of(kind));
            if sent + received > 0 {
                out.push_str(&format!("  {:<16} out {:>5}  in {:>5}\n", kind.to_string(), sent, received));
            }
        }

        out
    }

    /// Export metrics as a simple key=value text format.
    pub fn export_text(&self) -> String {
        format!(
            "process={}\n\
             duration_ms={}\n\
             messages_sent={}\n\
             messages_received={}\n\
             bytes_sent={}\n\
             bytes_received={}\n\
             send_waits={}\n\
             receive_waits={}\n",
            self.process,
            self.duration().as_millis(),
            self.total_sent(),
            self.total_received(),
            self.bytes_sent,
            self.bytes_received,
            self.send_waits,
            self.receive_waits,
        )
    }
}
