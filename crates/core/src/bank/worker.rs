//! Worker side of the banking protocol.

use crate::error::{ProtocolError, Result};
use crate::events::EventKind;
use crate::ledger::{BalanceHistory, Checkpoint, Ledger};
use crate::message::{DoneInfo, Message, TransferOrder};
use crate::messaging::Received;
use crate::node::Node;
use crate::{Balance, Timestamp, COORDINATOR};
use tracing::{debug, info};

/// Run one worker to completion.
///
/// # Arguments
/// - `node`: the worker's node (id 1..=N)
/// - `initial_balance`: balance recorded at `history[0]`
///
/// # Returns
/// The finished history, as shipped to the coordinator.
///
/// # Errors
/// - `ProtocolError::MisroutedTransfer` for a transfer naming neither this
///   worker as source nor as destination
/// - `ProtocolError::UnexpectedMessage` for any kind the main loop does not
///   accept
pub fn run_worker(node: &mut Node, initial_balance: Balance) -> Result<BalanceHistory> {
    let mut worker = Worker::new(node, initial_balance);

    worker.start()?;
    while worker.running() {
        let received = worker.node.receive_any()?;
        worker.handle(received)?;
    }
    worker.finish()
}

struct Worker<'a> {
    node: &'a mut Node,
    ledger: Ledger,
    // Peer workers whose Done has not arrived yet
    done_left: usize,
    stopped: bool,
}

impl<'a> Worker<'a> {
    fn new(node: &'a mut Node, initial_balance: Balance) -> Self {
        let done_left = node.worker_peers().len();

        Self {
            ledger: Ledger::new(node.id(), initial_balance),
            node,
            done_left,
            stopped: false,
        }
    }

    fn running(&self) -> bool {
        self.done_left > 0 || !self.stopped
    }

    fn checkpoint(&mut self, checkpoint: Checkpoint) -> Timestamp {
        self.ledger
            .append_checkpoint(self.node.clock_mut(), checkpoint)
    }

    fn start(&mut self) -> Result<()> {
        self.checkpoint(Checkpoint::initial());
        self.node.announce_started(self.ledger.balance())?;
        Ok(())
    }

    fn handle(&mut self, received: Received) -> Result<()> {
        match received.message {
            Message::Transfer(order) => self.on_transfer(order, received.timestamp),
            Message::Stop if !self.stopped && received.from == COORDINATOR => {
                self.on_stop(received.timestamp)
            }
            Message::Done(_) if self.done_left > 0 && received.from != COORDINATOR => {
                self.checkpoint(Checkpoint::sync_to(received.timestamp));
                self.done_left -= 1;
                Ok(())
            }
            _ => Err(self.node.unexpected("serve transfers", &received)),
        }
    }

    fn on_transfer(&mut self, order: TransferOrder, msg_time: Timestamp) -> Result<()> {
        let id = self.node.id();
        if id != order.src && id != order.dst {
            return Err(ProtocolError::MisroutedTransfer {
                local: id,
                src: order.src,
                dst: order.dst,
            }
            .into());
        }

        // Bring the history up to now before touching the balance
        self.checkpoint(Checkpoint::advance());

        if id == order.src {
            let at = self.checkpoint(Checkpoint::debit(order.amount, msg_time));
            self.checkpoint(Checkpoint::advance());
            debug!(process = id, time = at, amount = order.amount, to = order.dst, "debited");

            self.node.send(order.dst, &Message::Transfer(order))?;
        } else {
            let at = self.checkpoint(Checkpoint::credit(order.amount, msg_time));
            debug!(process = id, time = at, amount = order.amount, from = order.src, "credited");

            self.node.tick();
            self.node.send(COORDINATOR, &Message::Ack)?;
        }

        Ok(())
    }

    fn on_stop(&mut self, msg_time: Timestamp) -> Result<()> {
        self.checkpoint(Checkpoint::sync_to(msg_time));
        self.stopped = true;

        let balance = self.ledger.balance();
        self.node.emit(EventKind::Done { balance });
        self.node.multicast(&Message::Done(DoneInfo {
            id: self.node.id(),
            balance,
        }))
    }

    fn finish(mut self) -> Result<BalanceHistory> {
        self.node.emit(EventKind::ReceivedAllDone);
        self.checkpoint(Checkpoint::advance());

        let history = self.ledger.into_history();
        info!(
            process = self.node.id(),
            entries = history.len(),
            final_balance = ?history.final_balance(),
            "shipping history"
        );
        self.node
            .send(COORDINATOR, &Message::BalanceHistory(history.clone()))?;

        Ok(history)
    }
}
