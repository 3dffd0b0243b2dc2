//! Coordinator side of the banking protocol.

use super::driver::{Teller, TransferDriver};
use crate::error::Result;
use crate::ledger::AllHistory;
use crate::message::{Message, MessageKind};
use crate::node::Node;
use tracing::info;

/// Run the coordinator state machine to completion.
///
/// Phases, in order:
/// 1. collect Started from every worker
/// 2. hand a [`Teller`] to `driver`
/// 3. multicast Stop
/// 4. collect Done from every worker
/// 5. collect one BalanceHistory from every worker, ascending
///
/// # Returns
/// The histories of every worker, ordered by owner.
///
/// # Errors
/// Any protocol violation or transport failure ends the run.
pub fn run_coordinator<D>(node: &mut Node, driver: &mut D) -> Result<AllHistory>
where
    D: TransferDriver + ?Sized,
{
    let workers = node.worker_peers();

    node.wait_all_started()?;

    let mut teller = Teller::new(node, workers.len());
    driver.drive(&mut teller, workers.len())?;
    let issued = teller.issued();
    info!(transfers = issued, time = node.time(), "driver finished");

    node.tick();
    node.multicast(&Message::Stop)?;

    node.wait_all_done()?;

    let mut all = AllHistory::new();
    for worker in workers {
        let received = node.expect_from(worker, MessageKind::BalanceHistory, "collect histories")?;
        if let Message::BalanceHistory(history) = received.message {
            info!(
                worker,
                entries = history.len(),
                final_balance = ?history.final_balance(),
                "collected history"
            );
            all.insert(history);
        }
    }

    Ok(all)
}
