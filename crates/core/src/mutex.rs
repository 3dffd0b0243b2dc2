//! Distributed mutual exclusion over request/reply/release messages.
//!
//! # Algorithm
//!
//! A node that wants the critical section ticks, records its request key
//! `(timestamp, id)` and multicasts `CsRequest`. On an incoming request a
//! node replies at once unless it is inside the critical section, or it is
//! requesting itself with a smaller key; then the reply is deferred. A node
//! enters once every peer has replied. On exit it multicasts `CsRelease`
//! and sends all deferred replies.
//!
//! Keys are totally ordered (timestamp first, id as tiebreak), so at most
//! one node ever holds replies from everybody.
//!
//! # Termination
//!
//! A worker that has finished its own work multicasts `Done` and keeps
//! answering requests until every other worker is done too. The
//! coordinator never requests; it only answers, until all workers are done.

use crate::error::Result;
use crate::events::EventKind;
use crate::message::{DoneInfo, Message};
use crate::messaging::Received;
use crate::node::Node;
use crate::{Balance, ProcessId, Timestamp};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Priority of a critical-section request. Smaller keys go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    pub timestamp: Timestamp,
    pub id: ProcessId,
}

/// Where a node stands with respect to the critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsState {
    Idle,
    Requesting(RequestKey),
    InCriticalSection(RequestKey),
}

/// Critical-section protocol driver for one node.
pub struct MutualExclusion<'a> {
    node: &'a mut Node,
    state: CsState,
    // Peers that granted the pending request
    replies: BTreeSet<ProcessId>,
    // Peers whose requests wait for our release
    deferred: BTreeSet<ProcessId>,
    // Peers that announced Done
    done: BTreeSet<ProcessId>,
}

impl<'a> MutualExclusion<'a> {
    pub fn new(node: &'a mut Node) -> Self {
        Self {
            node,
            state: CsState::Idle,
            replies: BTreeSet::new(),
            deferred: BTreeSet::new(),
            done: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> CsState {
        self.state
    }

    pub fn node(&self) -> &Node {
        &*self.node
    }

    pub fn node_mut(&mut self) -> &mut Node {
        &mut *self.node
    }

    /// Peers that announced Done so far.
    pub fn done_peers(&self) -> &BTreeSet<ProcessId> {
        &self.done
    }

    /// Broadcast a request for the critical section.
    ///
    /// Does nothing beyond returning the current key if a request is
    /// already pending or granted.
    pub fn send_request(&mut self) -> Result<RequestKey> {
        match self.state {
            CsState::Requesting(key) | CsState::InCriticalSection(key) => return Ok(key),
            CsState::Idle => {}
        }

        let key = RequestKey {
            timestamp: self.node.tick(),
            id: self.node.id(),
        };
        self.state = CsState::Requesting(key);
        self.replies.clear();

        debug!(process = key.id, time = key.timestamp, "requesting critical section");
        self.node.multicast(&Message::CsRequest)?;
        Ok(key)
    }

    /// Serve incoming messages until every peer has granted the pending
    /// request, then enter the critical section.
    ///
    /// Sends a request first when none is pending.
    pub fn await_grant(&mut self) -> Result<()> {
        let key = match self.state {
            CsState::InCriticalSection(_) => return Ok(()),
            CsState::Requesting(key) => key,
            CsState::Idle => self.send_request()?,
        };

        while self.replies.len() < self.node.peers().len() {
            let received = self.node.receive_any()?;
            self.handle(received)?;
        }

        self.state = CsState::InCriticalSection(key);
        debug!(process = key.id, time = self.node.time(), "entered critical section");
        Ok(())
    }

    /// Request and wait for the critical section.
    pub fn request_cs(&mut self) -> Result<()> {
        self.send_request()?;
        self.await_grant()
    }

    /// Leave the critical section and answer every deferred request.
    pub fn release_cs(&mut self) -> Result<()> {
        if !matches!(self.state, CsState::InCriticalSection(_)) {
            return Ok(());
        }

        self.node.tick();
        self.state = CsState::Idle;
        self.node.multicast(&Message::CsRelease)?;

        for peer in std::mem::take(&mut self.deferred) {
            self.node.send(peer, &Message::CsReply)?;
        }

        debug!(process = self.node.id(), time = self.node.time(), "released critical section");
        Ok(())
    }

    /// Announce Done, then keep answering requests until every other
    /// worker is done as well.
    pub fn finish(&mut self, balance: Balance) -> Result<()> {
        self.node.tick();
        self.node.emit(EventKind::Done { balance });
        self.node.multicast(&Message::Done(DoneInfo {
            id: self.node.id(),
            balance,
        }))?;

        self.serve_until_done()
    }

    /// Answer requests until Done has arrived from every worker peer.
    pub fn serve_until_done(&mut self) -> Result<()> {
        let workers = self.node.worker_peers();

        while !workers.iter().all(|w| self.done.contains(w)) {
            let received = self.node.receive_any()?;
            self.handle(received)?;
        }

        self.node.emit(EventKind::ReceivedAllDone);
        info!(process = self.node.id(), time = self.node.time(), "received all DONE");
        Ok(())
    }

    /// Apply one incoming message.
    pub fn handle(&mut self, received: Received) -> Result<()> {
        self.node.accept(&received);

        match received.message {
            Message::CsRequest => {
                let incoming = RequestKey {
                    timestamp: received.timestamp,
                    id: received.from,
                };
                if self.should_defer(incoming) {
                    self.deferred.insert(received.from);
                    Ok(())
                } else {
                    self.node.send(received.from, &Message::CsReply)
                }
            }
            Message::CsReply if matches!(self.state, CsState::Requesting(_)) => {
                self.replies.insert(received.from);
                Ok(())
            }
            Message::CsRelease => Ok(()),
            Message::Done(_) => {
                self.done.insert(received.from);
                Ok(())
            }
            _ => Err(self.node.unexpected("mutual exclusion", &received)),
        }
    }

    fn should_defer(&self, incoming: RequestKey) -> bool {
        match self.state {
            CsState::Idle => false,
            CsState::Requesting(own) => own < incoming,
            CsState::InCriticalSection(_) => true,
        }
    }
}

/// Worker side of the critical-section workload.
///
/// Announces Started, then performs `id * 5` iterations, each inside the
/// critical section and each reported as a `LoopOperation` event, then
/// finishes with a zero balance.
pub fn run_worker(node: &mut Node) -> Result<()> {
    node.announce_started(0)?;

    let total = u32::from(node.id()) * 5;
    let mut mutex = MutualExclusion::new(node);

    for iteration in 1..=total {
        mutex.request_cs()?;
        mutex
            .node()
            .emit(EventKind::LoopOperation { iteration, total });
        mutex.release_cs()?;
    }

    mutex.finish(0)
}

/// Coordinator side of the critical-section workload: wait for Started,
/// then answer every request until all workers are done.
pub fn run_coordinator(node: &mut Node) -> Result<()> {
    node.wait_all_started()?;
    MutualExclusion::new(node).serve_until_done()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ProtocolError};
    use crate::events::MemorySink;
    use crate::message::MessageKind;
    use crate::transport::Mesh;
    use std::sync::Arc;

    fn group(ids: &[ProcessId], sink: &MemorySink) -> Vec<Node> {
        Mesh::full(ids, 16)
            .into_iter()
            .map(|e| Node::new(Box::new(e), Arc::new(sink.clone())))
            .collect()
    }

    #[test]
    fn test_request_key_order() {
        let a = RequestKey { timestamp: 3, id: 2 };
        let b = RequestKey { timestamp: 5, id: 1 };
        let c = RequestKey { timestamp: 5, id: 3 };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_idle_node_replies_at_once() {
        let sink = MemorySink::new();
        let mut nodes = group(&[1, 2], &sink);
        let mut requester = nodes.remove(0);
        let mut idle = nodes.remove(0);

        let mut req = MutualExclusion::new(&mut requester);
        let key = req.send_request().unwrap();
        assert_eq!(key, RequestKey { timestamp: 1, id: 1 });

        let mut other = MutualExclusion::new(&mut idle);
        let received = other.node_mut().receive_from(1).unwrap();
        other.handle(received).unwrap();

        req.await_grant().unwrap();
        assert_eq!(req.state(), CsState::InCriticalSection(key));
    }

    #[test]
    fn test_lower_key_defers_reply() {
        let sink = MemorySink::new();
        let mut nodes = group(&[1, 2], &sink);
        let mut n1 = nodes.remove(0);
        let mut n2 = nodes.remove(0);
        n2.clock_mut().observe(4);

        let mut m1 = MutualExclusion::new(&mut n1);
        let mut m2 = MutualExclusion::new(&mut n2);
        let k1 = m1.send_request().unwrap();
        let k2 = m2.send_request().unwrap();
        assert!(k1 < k2);

        // Node 2 yields to the older request; node 1 holds its reply back
        let from_1 = m2.node_mut().receive_from(1).unwrap();
        m2.handle(from_1).unwrap();
        let from_2 = m1.node_mut().receive_from(2).unwrap();
        m1.handle(from_2).unwrap();
        assert_eq!(m1.deferred.len(), 1);

        m1.await_grant().unwrap();
        m1.release_cs().unwrap();
        assert_eq!(m1.state(), CsState::Idle);

        // Release first, then the deferred reply
        m2.await_grant().unwrap();
        assert_eq!(m2.state(), CsState::InCriticalSection(k2));
        assert_eq!(m2.node().metrics().received_of(MessageKind::CsRelease), 1);
    }

    #[test]
    fn test_stray_reply_is_unexpected() {
        let sink = MemorySink::new();
        let mut nodes = group(&[1, 2], &sink);
        let mut n1 = nodes.remove(0);
        let mut n2 = nodes.remove(0);

        n2.send(1, &Message::CsReply).unwrap();
        let mut m1 = MutualExclusion::new(&mut n1);
        let received = m1.node_mut().receive_from(2).unwrap();

        assert!(matches!(
            m1.handle(received),
            Err(Error::Protocol(ProtocolError::UnexpectedMessage {
                kind: MessageKind::CsReply,
                ..
            }))
        ));
    }

    #[test]
    fn test_workload_with_coordinator() {
        let sink = MemorySink::new();
        let mut nodes = group(&[0, 1, 2], &sink);
        let mut coordinator = nodes.remove(0);

        let handles: Vec<_> = nodes
            .into_iter()
            .map(|mut node| std::thread::spawn(move || run_worker(&mut node)))
            .collect();
        run_coordinator(&mut coordinator).unwrap();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let loops = |id| {
            sink.events_of(id)
                .into_iter()
                .filter(|e| matches!(e.kind, EventKind::LoopOperation { .. }))
                .count()
        };
        assert_eq!(loops(1), 5);
        assert_eq!(loops(2), 10);
        assert_eq!(coordinator.metrics().sent_of(MessageKind::CsReply), 15);
    }
}
