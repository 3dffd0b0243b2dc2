//! Unicast, multicast and receive on top of the transport.
//!
//! This is the only layer that touches envelopes. Outgoing messages are
//! stamped with the caller's clock value and encoded; incoming frames are
//! parsed and decoded into [`Message`] before anyone above sees them.
//!
//! # Ordering
//!
//! - Messages from A to B arrive in send order (one FIFO channel per pair).
//! - `multicast` sends to peers one at a time in ascending id order; it is
//!   not atomic across recipients.
//! - `receive_any` scans peers in ascending id order and returns the first
//!   ready message. The scan is deterministic and deliberately not fair: a
//!   chatty low-numbered peer can starve a higher-numbered one.
//!
//! # Waiting
//!
//! A full channel on send and an empty channel on receive are never
//! errors. The layer blocks on the relevant channel(s) until they become
//! ready instead of spinning.

use crate::clock::Clock;
use crate::error::{ProtocolError, Result};
use crate::framing::Envelope;
use crate::message::Message;
use crate::metrics::NodeMetrics;
use crate::transport::Transport;
use crate::{ProcessId, Timestamp};
use tracing::{debug, trace};

/// A decoded message together with its origin and send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Peer that sent the message
    pub from: ProcessId,

    /// Sender's logical time when the message was sent
    pub timestamp: Timestamp,

    pub message: Message,
}

/// Messaging handle of one node.
pub struct Messenger {
    id: ProcessId,
    peers: Vec<ProcessId>,
    transport: Box<dyn Transport>,
    metrics: NodeMetrics,
}

impl Messenger {
    /// Wrap a transport endpoint.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let id = transport.local_id();
        let mut peers = transport.peers();
        peers.sort_unstable();

        Self {
            id,
            peers,
            transport,
            metrics: NodeMetrics::new(id),
        }
    }

    pub fn local_id(&self) -> ProcessId {
        self.id
    }

    /// Every other participant, ascending.
    pub fn peers(&self) -> &[ProcessId] {
        &self.peers
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut NodeMetrics {
        &mut self.metrics
    }

    /// Send `message` to `dst`, stamped with the clock's current time.
    ///
    /// Waits as long as the channel is full.
    ///
    /// # Errors
    /// - `ProtocolError::SelfAddressed` if `dst` is this node
    /// - `Error::Channel` if `dst` hung up
    pub fn unicast(&mut self, dst: ProcessId, message: &Message, clock: &Clock) -> Result<()> {
        if dst == self.id {
            return Err(ProtocolError::SelfAddressed(dst).into());
        }

        let envelope = message.to_envelope(clock.current_time())?;
        self.write(dst, &envelope)
    }

    /// Send `message` to every peer in ascending id order.
    ///
    /// The envelope is encoded once; every recipient sees the same timestamp.
    pub fn multicast(&mut self, message: &Message, clock: &Clock) -> Result<()> {
        let envelope = message.to_envelope(clock.current_time())?;

        for i in 0..self.peers.len() {
            let dst = self.peers[i];
            self.write(dst, &envelope)?;
        }

        Ok(())
    }

    /// Wait for the next message from `src`.
    ///
    /// # Errors
    /// - `FramingError` variants if the frame is malformed (a partial header
    ///   included)
    /// - `Error::Channel` if `src` hung up with nothing queued
    pub fn receive_from(&mut self, src: ProcessId) -> Result<Received> {
        if src == self.id {
            return Err(ProtocolError::SelfAddressed(src).into());
        }

        let frame = match self.transport.try_recv(src)? {
            Some(frame) => frame,
            None => {
                self.metrics.receive_waits += 1;
                self.transport.recv(src)?
            }
        };

        self.decode(src, &frame)
    }

    /// Wait for the next message from any peer.
    ///
    /// Peers are polled in ascending id order on every pass, so when several
    /// peers have messages ready the lowest id always wins.
    pub fn receive_any(&mut self) -> Result<Received> {
        let mut waited = false;

        loop {
            for i in 0..self.peers.len() {
                let src = self.peers[i];
                if let Some(frame) = self.transport.try_recv(src)? {
                    return self.decode(src, &frame);
                }
            }

            if !waited {
                self.metrics.receive_waits += 1;
                waited = true;
            }
            self.transport.wait_readable(&self.peers)?;
        }
    }

    fn write(&mut self, dst: ProcessId, envelope: &Envelope) -> Result<()> {
        let frame = envelope.serialize();
        let len = frame.len();

        if let Some(frame) = self.transport.try_send(dst, frame)? {
            trace!(from = self.id, to = dst, "channel full, waiting");
            self.metrics.send_waits += 1;
            self.transport.send(dst, frame)?;
        }

        debug!(
            from = self.id,
            to = dst,
            kind = %envelope.kind(),
            time = envelope.timestamp(),
            "sent"
        );
        self.metrics.record_sent(envelope.kind(), len);
        Ok(())
    }

    fn decode(&mut self, src: ProcessId, frame: &[u8]) -> Result<Received> {
        let envelope = Envelope::deserialize(frame)?;
        let message = Message::from_envelope(&envelope)?;

        debug!(
            at = self.id,
            from = src,
            kind = %envelope.kind(),
            time = envelope.timestamp(),
            "received"
        );
        self.metrics.record_received(envelope.kind(), frame.len());

        Ok(Received {
            from: src,
            timestamp: envelope.timestamp(),
            message,
        })
    }
}
