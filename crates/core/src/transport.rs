//! In-process channel mesh.
//!
//! Every ordered pair of participants gets its own bounded FIFO channel, so
//! messages from A to B always arrive in the order A sent them. Nothing is
//! ordered across different senders.
//!
//! # Backpressure
//!
//! Channels are bounded. A send to a full channel blocks until the receiver
//! drains it; a receive on an empty channel blocks until a frame arrives.
//! Neither has a timeout, so a stalled peer stalls its correspondents.
//!
//! # Failure
//!
//! A peer whose endpoint was dropped is a hard failure for anyone still
//! waiting on it specifically. `receive any` style waits skip peers that
//! have hung up with nothing left to read.

use crate::error::{Error, ProtocolError, Result};
use crate::ProcessId;
use crossbeam::channel::{self, Receiver, Select, Sender, TryRecvError, TrySendError};
use std::collections::{BTreeMap, BTreeSet};

/// Raw byte channels from one node to each of its peers.
///
/// Frames are opaque byte vectors; the messaging layer owns their meaning.
pub trait Transport: Send {
    /// Id of the node owning this endpoint.
    fn local_id(&self) -> ProcessId;

    /// Ids of every peer, ascending.
    fn peers(&self) -> Vec<ProcessId>;

    /// Offer a frame without waiting.
    ///
    /// # Returns
    /// - `Ok(None)` if the channel accepted the frame
    /// - `Ok(Some(frame))` if the channel is full; the frame is handed back
    fn try_send(&mut self, dst: ProcessId, frame: Vec<u8>) -> Result<Option<Vec<u8>>>;

    /// Send a frame, waiting as long as the channel stays full.
    fn send(&mut self, dst: ProcessId, frame: Vec<u8>) -> Result<()>;

    /// Take the next frame from `src` if one is ready.
    fn try_recv(&mut self, src: ProcessId) -> Result<Option<Vec<u8>>>;

    /// Take the next frame from `src`, waiting until one arrives.
    fn recv(&mut self, src: ProcessId) -> Result<Vec<u8>>;

    /// Block until at least one of `peers` has a frame ready (or hung up).
    fn wait_readable(&mut self, peers: &[ProcessId]) -> Result<()>;
}

/// Builder for a fully connected group of endpoints.
pub struct Mesh;

impl Mesh {
    /// Create one [`Endpoint`] per id, connected to every other id.
    ///
    /// # Arguments
    /// - `ids`: participant ids (duplicates are ignored)
    /// - `capacity`: frames each directed channel buffers before senders block
    ///
    /// # Returns
    /// Endpoints in ascending id order.
    pub fn full(ids: &[ProcessId], capacity: usize) -> Vec<Endpoint> {
        let ids: BTreeSet<ProcessId> = ids.iter().copied().collect();

        let mut endpoints: BTreeMap<ProcessId, Endpoint> = ids
            .iter()
            .map(|&id| (id, Endpoint::empty(id)))
            .collect();

        // One channel per ordered pair
        for &from in &ids {
            for &to in &ids {
                if from == to {
                    continue;
                }

                let (tx, rx) = channel::bounded(capacity);
                if let Some(sender) = endpoints.get_mut(&from) {
                    sender.outbound.insert(to, tx);
                }
                if let Some(receiver) = endpoints.get_mut(&to) {
                    receiver.inbound.insert(from, rx);
                }
            }
        }

        endpoints.into_values().collect()
    }
}

/// One node's half of the mesh: a sender to and a receiver from every peer.
#[derive(Debug)]
pub struct Endpoint {
    id: ProcessId,
    outbound: BTreeMap<ProcessId, Sender<Vec<u8>>>,
    inbound: BTreeMap<ProcessId, Receiver<Vec<u8>>>,
    // Peers that hung up and have nothing left to read
    closed: BTreeSet<ProcessId>,
}

impl Endpoint {
    fn empty(id: ProcessId) -> Self {
        Self {
            id,
            outbound: BTreeMap::new(),
            inbound: BTreeMap::new(),
            closed: BTreeSet::new(),
        }
    }

    fn sender(&self, dst: ProcessId) -> Result<&Sender<Vec<u8>>> {
        if dst == self.id {
            return Err(ProtocolError::SelfAddressed(dst).into());
        }
        self.outbound.get(&dst).ok_or_else(|| {
            ProtocolError::UnknownPeer {
                local: self.id,
                peer: dst,
            }
            .into()
        })
    }

    fn receiver(&self, src: ProcessId) -> Result<&Receiver<Vec<u8>>> {
        if src == self.id {
            return Err(ProtocolError::SelfAddressed(src).into());
        }
        self.inbound.get(&src).ok_or_else(|| {
            ProtocolError::UnknownPeer {
                local: self.id,
                peer: src,
            }
            .into()
        })
    }

    fn hung_up(&self, peer: ProcessId) -> Error {
        Error::Channel(format!("process {} hung up on process {}", peer, self.id))
    }
}

impl Transport for Endpoint {
    fn local_id(&self) -> ProcessId {
        self.id
    }

    fn peers(&self) -> Vec<ProcessId> {
        self.outbound.keys().copied().collect()
    }

    fn try_send(&mut self, dst: ProcessId, frame: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let attempt = self.sender(dst)?.try_send(frame);
        match attempt {
            Ok(()) => Ok(None),
            Err(TrySendError::Full(frame)) => Ok(Some(frame)),
            Err(TrySendError::Disconnected(_)) => Err(self.hung_up(dst)),
        }
    }

    fn send(&mut self, dst: ProcessId, frame: Vec<u8>) -> Result<()> {
        self.sender(dst)?
            .send(frame)
            .map_err(|_| self.hung_up(dst))
    }

    fn try_recv(&mut self, src: ProcessId) -> Result<Option<Vec<u8>>> {
        let attempt = self.receiver(src)?.try_recv();
        match attempt {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                self.closed.insert(src);
                Ok(None)
            }
        }
    }

    fn recv(&mut self, src: ProcessId) -> Result<Vec<u8>> {
        let received = self.receiver(src)?.recv();
        match received {
            Ok(frame) => Ok(frame),
            Err(_) => {
                self.closed.insert(src);
                Err(self.hung_up(src))
            }
        }
    }

    fn wait_readable(&mut self, peers: &[ProcessId]) -> Result<()> {
        let mut select = Select::new();
        let mut watched = 0;

        for peer in peers {
            if self.closed.contains(peer) {
                continue;
            }
            select.recv(self.receiver(*peer)?);
            watched += 1;
        }

        if watched == 0 {
            return Err(Error::Channel(format!(
                "process {} has no open inbound channels left",
                self.id
            )));
        }

        // Readiness only; the caller does the actual (ordered) read
        select.ready();
        Ok(())
    }
}
