//! One participant of the group.
//!
//! A [`Node`] bundles what every protocol role needs: the node's own
//! [`Clock`], its messaging handle, and the event sink it reports to. The
//! banking and mutual-exclusion state machines borrow a node; none of them
//! touch the transport directly.

use crate::clock::Clock;
use crate::error::{Error, ProtocolError, Result};
use crate::events::{EventKind, EventRecord, EventSink};
use crate::message::{DoneInfo, Message, MessageKind, StartedInfo};
use crate::messaging::{Messenger, Received};
use crate::metrics::NodeMetrics;
use crate::transport::Transport;
use crate::{Balance, ProcessId, Timestamp, COORDINATOR};
use std::sync::Arc;
use tracing::{info, warn};

/// A participant: clock, messaging and event reporting.
pub struct Node {
    id: ProcessId,
    clock: Clock,
    messenger: Messenger,
    sink: Arc<dyn EventSink>,
}

impl Node {
    /// Create a node on top of a transport endpoint, with its clock at 0.
    pub fn new(transport: Box<dyn Transport>, sink: Arc<dyn EventSink>) -> Self {
        let messenger = Messenger::new(transport);

        Self {
            id: messenger.local_id(),
            clock: Clock::new(),
            messenger,
            sink,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn is_coordinator(&self) -> bool {
        self.id == COORDINATOR
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    /// Current logical time.
    pub fn time(&self) -> Timestamp {
        self.clock.current_time()
    }

    /// Advance the clock for a local event.
    pub fn tick(&mut self) -> Timestamp {
        self.clock.tick()
    }

    /// Every other participant, ascending.
    pub fn peers(&self) -> &[ProcessId] {
        self.messenger.peers()
    }

    /// Every other participant except the coordinator, ascending.
    pub fn worker_peers(&self) -> Vec<ProcessId> {
        self.peers()
            .iter()
            .copied()
            .filter(|&p| p != COORDINATOR)
            .collect()
    }

    pub fn metrics(&self) -> &NodeMetrics {
        self.messenger.metrics()
    }

    /// Stop the metrics timer and hand out a copy.
    pub fn finish_metrics(&mut self) -> NodeMetrics {
        let metrics = self.messenger.metrics_mut();
        metrics.complete();
        metrics.clone()
    }

    /// Send `message` to `dst`, stamped with the current clock value.
    pub fn send(&mut self, dst: ProcessId, message: &Message) -> Result<()> {
        self.messenger.unicast(dst, message, &self.clock)
    }

    /// Send `message` to every peer, stamped with the current clock value.
    pub fn multicast(&mut self, message: &Message) -> Result<()> {
        self.messenger.multicast(message, &self.clock)
    }

    pub fn receive_from(&mut self, src: ProcessId) -> Result<Received> {
        self.messenger.receive_from(src)
    }

    pub fn receive_any(&mut self) -> Result<Received> {
        self.messenger.receive_any()
    }

    /// Apply the Lamport receive rule to a received message.
    pub fn accept(&mut self, received: &Received) -> Timestamp {
        self.clock.receive(received.timestamp)
    }

    /// Report an event of this node at the current logical time.
    pub fn emit(&self, kind: EventKind) {
        self.emit_as(self.id, kind);
    }

    /// Report an event on behalf of `process` at this node's logical time.
    pub fn emit_as(&self, process: ProcessId, kind: EventKind) {
        let record = EventRecord::new(self.time(), process, kind);
        self.sink.record(&record);
    }

    /// Build the error for a message the current state does not accept.
    pub fn unexpected(&self, state: &'static str, received: &Received) -> Error {
        warn!(
            process = self.id,
            state,
            from = received.from,
            kind = %received.message.kind(),
            "unexpected message"
        );

        ProtocolError::UnexpectedMessage {
            local: self.id,
            state,
            from: received.from,
            kind: received.message.kind(),
        }
        .into()
    }

    /// Receive the next message from `src` and insist on its kind.
    ///
    /// The Lamport receive rule is applied before returning.
    ///
    /// # Errors
    /// `ProtocolError::UnexpectedMessage` naming `state` if another kind arrives.
    pub fn expect_from(
        &mut self,
        src: ProcessId,
        kind: MessageKind,
        state: &'static str,
    ) -> Result<Received> {
        let received = self.receive_from(src)?;
        if received.message.kind() != kind {
            return Err(self.unexpected(state, &received));
        }

        self.accept(&received);
        Ok(received)
    }

    /// Started announcement for this node.
    ///
    /// Every node runs in the same OS process, so the process id doubles as
    /// the parent id.
    pub fn started_info(&self, balance: Balance) -> StartedInfo {
        let os_pid = std::process::id();
        StartedInfo {
            id: self.id,
            os_pid,
            parent_pid: os_pid,
            balance,
        }
    }

    /// Worker startup: announce Started to everyone, then wait for every
    /// peer worker's Started.
    pub fn announce_started(&mut self, balance: Balance) -> Result<Vec<StartedInfo>> {
        let info = self.started_info(balance);

        self.tick();
        self.emit(EventKind::Started {
            os_pid: info.os_pid,
            parent_pid: info.parent_pid,
            balance,
        });
        self.multicast(&Message::Started(info))?;
        self.tick();

        self.wait_all_started()
    }

    /// Collect one Started from every worker peer, in ascending id order.
    pub fn wait_all_started(&mut self) -> Result<Vec<StartedInfo>> {
        let mut infos = Vec::new();

        for peer in self.worker_peers() {
            let received = self.expect_from(peer, MessageKind::Started, "wait started")?;
            if let Message::Started(info) = received.message {
                infos.push(info);
            }
        }

        self.emit(EventKind::ReceivedAllStarted);
        info!(process = self.id, time = self.time(), "received all STARTED");
        Ok(infos)
    }

    /// Collect one Done from every worker peer, in ascending id order.
    pub fn wait_all_done(&mut self) -> Result<Vec<DoneInfo>> {
        let mut infos = Vec::new();

        for peer in self.worker_peers() {
            let received = self.expect_from(peer, MessageKind::Done, "wait done")?;
            if let Message::Done(info) = received.message {
                infos.push(info);
            }
        }

        self.emit(EventKind::ReceivedAllDone);
        info!(process = self.id, time = self.time(), "received all DONE");
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::transport::Mesh;

    fn group(ids: &[ProcessId], sink: &MemorySink) -> Vec<Node> {
        Mesh::full(ids, 16)
            .into_iter()
            .map(|e| Node::new(Box::new(e), Arc::new(sink.clone())))
            .collect()
    }

    #[test]
    fn test_worker_peers_skip_coordinator() {
        let sink = MemorySink::new();
        let nodes = group(&[0, 1, 2, 3], &sink);

        assert!(nodes[0].is_coordinator());
        assert_eq!(nodes[0].worker_peers(), vec![1, 2, 3]);
        assert_eq!(nodes[2].worker_peers(), vec![1, 3]);
        assert_eq!(nodes[2].peers(), &[0, 1, 3]);
    }

    #[test]
    fn test_expect_from_applies_receive_rule() {
        let sink = MemorySink::new();
        let mut nodes = group(&[0, 1], &sink);

        nodes[1].clock_mut().observe(7);
        nodes[1].send(0, &Message::Ack).unwrap();

        let received = nodes[0].expect_from(1, MessageKind::Ack, "test").unwrap();
        assert_eq!(received.timestamp, 7);
        assert_eq!(nodes[0].time(), 8);
    }

    #[test]
    fn test_expect_from_rejects_other_kind() {
        let sink = MemorySink::new();
        let mut nodes = group(&[0, 1], &sink);

        nodes[1].send(0, &Message::Stop).unwrap();
        let result = nodes[0].expect_from(1, MessageKind::Ack, "transfer");

        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::UnexpectedMessage {
                local: 0,
                state: "transfer",
                from: 1,
                kind: MessageKind::Stop,
            }))
        ));
    }

    #[test]
    fn test_emit_stamps_current_time() {
        let sink = MemorySink::new();
        let mut nodes = group(&[0, 1], &sink);

        nodes[0].clock_mut().observe(4);
        nodes[0].emit_as(2, EventKind::TransferIn { src: 1, amount: 3 });

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, 4);
        assert_eq!(events[0].process, 2);
    }

    #[test]
    fn test_started_phase_of_two_workers() {
        let sink = MemorySink::new();
        let mut nodes = group(&[0, 1, 2], &sink);
        let mut w2 = nodes.remove(2);
        let mut w1 = nodes.remove(1);
        let mut coordinator = nodes.remove(0);

        let handle = std::thread::spawn(move || {
            w2.announce_started(20).unwrap();
            w2.time()
        });
        let peers = w1.announce_started(10).unwrap();
        let w2_time = handle.join().unwrap();

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].balance, 20);
        assert_eq!(w1.time(), 3);
        assert_eq!(w2_time, 3);

        let infos = coordinator.wait_all_started().unwrap();
        assert_eq!(infos.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(coordinator.time(), 3);

        let done_all = sink
            .events()
            .into_iter()
            .filter(|e| e.kind == EventKind::ReceivedAllStarted)
            .count();
        assert_eq!(done_all, 3);
    }
}
