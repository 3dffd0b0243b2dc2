//! The injected transfer policy.

use crate::error::{ProtocolError, Result};
use crate::events::EventKind;
use crate::message::{Message, MessageKind, TransferOrder};
use crate::node::Node;
use crate::{Balance, ProcessId, COORDINATOR};
use tracing::debug;

/// Decides which transfers the coordinator issues, and in what order.
///
/// A driver sees only a [`Teller`]; each `transfer` call returns once the
/// destination has acknowledged, so orders never overlap.
pub trait TransferDriver {
    fn drive(&mut self, teller: &mut Teller<'_>, workers: usize) -> Result<()>;
}

impl<F> TransferDriver for F
where
    F: FnMut(&mut Teller<'_>, usize) -> Result<()>,
{
    fn drive(&mut self, teller: &mut Teller<'_>, workers: usize) -> Result<()> {
        self(teller, workers)
    }
}

/// The coordinator's transfer handle, lent to a driver.
pub struct Teller<'a> {
    node: &'a mut Node,
    workers: usize,
    issued: usize,
}

impl<'a> Teller<'a> {
    pub(crate) fn new(node: &'a mut Node, workers: usize) -> Self {
        Self {
            node,
            workers,
            issued: 0,
        }
    }

    /// Number of workers in the group.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Transfers completed so far.
    pub fn issued(&self) -> usize {
        self.issued
    }

    /// Move `amount` from worker `src` to worker `dst` and wait for the Ack.
    ///
    /// # Errors
    /// - `ProtocolError::SelfTransfer` if `src == dst`
    /// - `ProtocolError::UnknownPeer` if either endpoint is not a worker
    /// - `ProtocolError::UnexpectedMessage` if `dst` answers with anything
    ///   but an Ack
    pub fn transfer(&mut self, src: ProcessId, dst: ProcessId, amount: Balance) -> Result<()> {
        let order = TransferOrder::new(src, dst, amount)?;
        for peer in [src, dst] {
            if !self.is_worker(peer) {
                return Err(ProtocolError::UnknownPeer {
                    local: self.node.id(),
                    peer,
                }
                .into());
            }
        }

        self.node.tick();
        self.node.send(src, &Message::Transfer(order))?;
        self.node.emit_as(src, EventKind::TransferOut { dst, amount });

        self.node.expect_from(dst, MessageKind::Ack, "transfer")?;
        self.node.emit_as(dst, EventKind::TransferIn { src, amount });

        self.issued += 1;
        debug!(src, dst, amount, time = self.node.time(), "transfer acknowledged");
        Ok(())
    }

    fn is_worker(&self, id: ProcessId) -> bool {
        id != COORDINATOR && (id as usize) <= self.workers
    }
}
