//! Log files of a run.
//!
//! - `events.log`: one line per protocol event, in the classic text form
//! - `pipes.log`: the channel topology, one block per process
//! - `metrics.log`: key=value counters of every process
//!
//! Events also go to stdout through [`StdoutSink`].

use lamport_sim_core::events::{EventRecord, EventSink};
use lamport_sim_core::metrics::NodeMetrics;
use lamport_sim_core::ProcessId;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

pub const EVENTS_LOG: &str = "events.log";
pub const PIPES_LOG: &str = "pipes.log";
pub const METRICS_LOG: &str = "metrics.log";

/// Prints every event on its own line.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn record(&self, event: &EventRecord) {
        println!("{}", event);
    }
}

/// Appends every event to a file.
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    /// Open (truncating) `events.log` in `dir`.
    pub fn create(dir: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(EVENTS_LOG))?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EventSink for FileSink {
    fn record(&self, event: &EventRecord) {
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(file, "{}", event) {
            tracing::warn!(error = %e, "failed to append to {}", EVENTS_LOG);
        }
    }
}

/// Render the topology of a full mesh over `ids`.
pub fn pipes_report(ids: &[ProcessId], capacity: usize) -> String {
    let mut out = String::new();

    for &id in ids {
        out.push_str(&format!("process {}:\n", id));
        for &peer in ids.iter().filter(|&&p| p != id) {
            out.push_str(&format!(
                "  {} -> {} (capacity {})\n  {} <- {} (capacity {})\n",
                id, peer, capacity, id, peer, capacity
            ));
        }
    }

    out
}

/// Write `pipes.log` into `dir`.
pub fn write_pipes_log(dir: &Path, ids: &[ProcessId], capacity: usize) -> io::Result<()> {
    let mut file = File::create(dir.join(PIPES_LOG))?;
    file.write_all(pipes_report(ids, capacity).as_bytes())
}

/// Write `metrics.log` into `dir`, one block per process separated by a
/// blank line.
pub fn write_metrics_log(dir: &Path, metrics: &[NodeMetrics]) -> io::Result<()> {
    let blocks: Vec<String> = metrics.iter().map(NodeMetrics::export_text).collect();
    std::fs::write(dir.join(METRICS_LOG), blocks.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamport_sim_core::events::EventKind;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("lamport-sim-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_pipes_report_lists_every_pair() {
        let report = pipes_report(&[0, 1, 2], 8);
        assert!(report.starts_with("process 0:\n"));
        assert!(report.contains("  1 -> 2 (capacity 8)"));
        assert!(report.contains("  2 <- 0 (capacity 8)"));
        // 3 headers + 3 * 2 peers * 2 directions
        assert_eq!(report.lines().count(), 15);
    }

    #[test]
    fn test_file_sink_writes_classic_lines() {
        let dir = scratch_dir("events");
        let sink = FileSink::create(&dir).unwrap();

        sink.record(&EventRecord::new(2, 1, EventKind::ReceivedAllStarted));
        sink.record(&EventRecord::new(5, 1, EventKind::Done { balance: 7 }));
        drop(sink);

        let text = std::fs::read_to_string(dir.join(EVENTS_LOG)).unwrap();
        assert_eq!(
            text,
            "2: process 1 received all STARTED messages\n5: process 1 has DONE with balance $ 7\n"
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_pipes_log() {
        let dir = scratch_dir("pipes");
        write_pipes_log(&dir, &[0, 1], 4).unwrap();

        let text = std::fs::read_to_string(dir.join(PIPES_LOG)).unwrap();
        assert_eq!(text, pipes_report(&[0, 1], 4));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_metrics_log() {
        let dir = scratch_dir("metrics");
        let mut first = NodeMetrics::new(0);
        first.record_sent(lamport_sim_core::message::MessageKind::Stop, 11);
        let second = NodeMetrics::new(1);
        write_metrics_log(&dir, &[first, second]).unwrap();

        let text = std::fs::read_to_string(dir.join(METRICS_LOG)).unwrap();
        let blocks: Vec<&str> = text.split("\n\n").collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("process=0\n"));
        assert!(blocks[0].contains("messages_sent=1\n"));
        assert!(blocks[1].starts_with("process=1\n"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
