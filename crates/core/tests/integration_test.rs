//! Integration tests for whole simulated groups.
//!
//! These tests run a coordinator and its workers on threads over the
//! in-memory channel mesh and check the end results: balances, history
//! shape, money conservation and critical-section ordering.

use lamport_sim_core::{
    bank::{self, Teller},
    error::ProtocolError,
    events::{EventKind, MemorySink},
    ledger::{AllHistory, BalanceHistory},
    message::{DoneInfo, Message, MessageKind},
    mutex::{self, MutualExclusion},
    node::Node,
    transport::Mesh,
    Balance, Error, ProcessId, Result, Timestamp,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn group(ids: &[ProcessId], capacity: usize, sink: &MemorySink) -> Vec<Node> {
    Mesh::full(ids, capacity)
        .into_iter()
        .map(|e| Node::new(Box::new(e), Arc::new(sink.clone())))
        .collect()
}

/// Run a full banking group with a fixed list of orders.
///
/// Returns the coordinator's collected histories and each worker's final
/// clock value.
fn run_bank(
    balances: &[Balance],
    orders: &[(ProcessId, ProcessId, Balance)],
    sink: &MemorySink,
) -> (AllHistory, Vec<Timestamp>) {
    let ids: Vec<ProcessId> = (0..=balances.len() as ProcessId).collect();
    let mut nodes = group(&ids, 4, sink);
    let mut coordinator = nodes.remove(0);

    let handles: Vec<_> = nodes
        .into_iter()
        .zip(balances.iter().copied())
        .map(|(mut node, balance)| {
            thread::spawn(move || {
                let history = bank::run_worker(&mut node, balance)?;
                Ok::<_, Error>((history, node.time()))
            })
        })
        .collect();

    let orders = orders.to_vec();
    let mut driver = move |teller: &mut Teller<'_>, _workers: usize| -> Result<()> {
        for &(src, dst, amount) in &orders {
            teller.transfer(src, dst, amount)?;
        }
        Ok(())
    };
    let all = bank::run_coordinator(&mut coordinator, &mut driver).expect("coordinator failed");

    let mut final_clocks = Vec::new();
    for handle in handles {
        let (history, clock): (BalanceHistory, Timestamp) =
            handle.join().expect("worker panicked").expect("worker failed");
        assert_eq!(Some(&history), all.get(history.owner()));
        final_clocks.push(clock);
    }

    (all, final_clocks)
}

/// Two workers, one transfer: balances, pending window and conservation.
#[test]
fn test_single_transfer_history() {
    let sink = MemorySink::new();
    let (all, final_clocks) = run_bank(&[10, 20], &[(1, 2, 5)], &sink);

    let w1 = all.get(1).unwrap();
    let w2 = all.get(2).unwrap();
    assert_eq!(w1.final_balance(), Some(5));
    assert_eq!(w2.final_balance(), Some(25));

    // Source debits at 5 and forwards at 6
    for t in 0..=4 {
        assert_eq!(w1.at(t).unwrap().balance, 10);
    }
    assert_eq!(w1.at(5).unwrap().balance, 5);
    assert!(w1.entries().iter().all(|s| s.pending_in == 0));

    // Destination shows the money in flight from the debit until the credit
    for t in 0..=6 {
        assert_eq!(w2.at(t).unwrap().balance, 20);
    }
    let pending: Vec<Timestamp> = w2
        .entries()
        .iter()
        .filter(|s| s.pending_in == 5)
        .map(|s| s.time)
        .collect();
    assert_eq!(pending, vec![5, 6]);
    assert_eq!(w2.at(7).unwrap().balance, 25);

    // Every history ends at its owner's final clock
    assert_eq!(w1.len() as Timestamp, final_clocks[0] + 1);
    assert_eq!(w2.len() as Timestamp, final_clocks[1] + 1);

    assert_eq!(all.check_conservation(30), None);

    // The coordinator logs both halves of the transfer
    let events = sink.events();
    let out = events
        .iter()
        .find(|e| matches!(e.kind, EventKind::TransferOut { .. }))
        .unwrap();
    assert_eq!((out.time, out.process), (4, 1));
    let inn = events
        .iter()
        .find(|e| matches!(e.kind, EventKind::TransferIn { .. }))
        .unwrap();
    assert_eq!((inn.time, inn.process), (9, 2));
}

/// The classic chain of transfers across five workers.
#[test]
fn test_robbery_chain_conserves_money() {
    let balances: Vec<Balance> = vec![10, 20, 30, 40, 50];
    let n = balances.len() as ProcessId;
    let mut orders: Vec<_> = (1..n).map(|i| (i, i + 1, Balance::from(i))).collect();
    orders.push((n, 1, 1));

    let sink = MemorySink::new();
    let (all, final_clocks) = run_bank(&balances, &orders, &sink);

    let finals: Vec<Balance> = all
        .histories()
        .iter()
        .map(|h| h.final_balance().unwrap())
        .collect();
    assert_eq!(finals, vec![10, 19, 29, 39, 53]);
    assert_eq!(all.total_final_balance(), 150);
    assert_eq!(all.check_conservation(150), None);

    for (history, clock) in all.histories().iter().zip(final_clocks) {
        assert_eq!(history.len() as Timestamp, clock + 1);
        for (t, state) in history.entries().iter().enumerate() {
            assert_eq!(state.time, t as Timestamp);
        }
    }

    // Every process reports Done once and all-Done once; the coordinator
    // only reports all-Done
    for id in 1..=n {
        let own = sink.events_of(id);
        assert_eq!(own.iter().filter(|e| matches!(e.kind, EventKind::Done { .. })).count(), 1);
        assert_eq!(own.iter().filter(|e| e.kind == EventKind::ReceivedAllDone).count(), 1);
    }
    let coordinator_all_done = sink
        .events_of(0)
        .iter()
        .filter(|e| e.kind == EventKind::ReceivedAllDone)
        .count();
    assert_eq!(coordinator_all_done, 1);
}

/// Messages ready from several peers are taken lowest id first.
#[test]
fn test_receive_any_scans_ascending() {
    let sink = MemorySink::new();
    let mut nodes = group(&[0, 1, 2, 3], 4, &sink);

    nodes[3].send(2, &Message::CsRequest).unwrap();
    nodes[1].send(2, &Message::CsRequest).unwrap();

    let first = nodes[2].receive_any().unwrap();
    let second = nodes[2].receive_any().unwrap();
    assert_eq!((first.from, second.from), (1, 3));
}

/// Three requesters with keys (5, 1), (3, 2), (7, 3) enter in key order and
/// never overlap.
#[test]
fn test_critical_section_order() {
    let sink = MemorySink::new();
    let nodes = group(&[1, 2, 3], 8, &sink);
    let starting_clocks: [Timestamp; 3] = [4, 2, 6];

    let log: Arc<Mutex<Vec<(ProcessId, &'static str)>>> = Arc::new(Mutex::new(Vec::new()));
    let inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = nodes
        .into_iter()
        .zip(starting_clocks)
        .map(|(mut node, clock)| {
            let log = Arc::clone(&log);
            let inside = Arc::clone(&inside);
            thread::spawn(move || -> Result<Timestamp> {
                node.clock_mut().observe(clock);
                let mut mutex = MutualExclusion::new(&mut node);

                let key = mutex.send_request()?;
                mutex.await_grant()?;

                let id = mutex.node().id();
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "two nodes inside");
                log.lock().unwrap().push((id, "enter"));
                thread::sleep(Duration::from_millis(20));
                log.lock().unwrap().push((id, "exit"));
                inside.fetch_sub(1, Ordering::SeqCst);

                mutex.release_cs()?;
                mutex.finish(0)?;
                Ok(key.timestamp)
            })
        })
        .collect();

    let keys: Vec<Timestamp> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    assert_eq!(keys, vec![5, 3, 7]);

    let log = log.lock().unwrap().clone();
    assert_eq!(
        log,
        vec![
            (2, "enter"),
            (2, "exit"),
            (1, "enter"),
            (1, "exit"),
            (3, "enter"),
            (3, "exit"),
        ]
    );
}

/// Workers contending over many rounds, with the coordinator answering,
/// never share the critical section.
#[test]
fn test_repeated_rounds_stay_exclusive() {
    const ROUNDS: usize = 10;
    let sink = MemorySink::new();
    let mut nodes = group(&[0, 1, 2, 3], 8, &sink);
    let mut coordinator = nodes.remove(0);

    let inside = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = nodes
        .into_iter()
        .map(|mut node| {
            let inside = Arc::clone(&inside);
            let entries = Arc::clone(&entries);
            thread::spawn(move || -> Result<()> {
                node.announce_started(0)?;
                let mut mutex = MutualExclusion::new(&mut node);

                for _ in 0..ROUNDS {
                    mutex.request_cs()?;
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "two nodes inside");
                    entries.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    mutex.release_cs()?;
                }

                mutex.finish(0)
            })
        })
        .collect();

    mutex::run_coordinator(&mut coordinator).unwrap();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(entries.load(Ordering::SeqCst), 3 * ROUNDS);
    assert_eq!(coordinator.metrics().sent_of(MessageKind::CsReply), 3 * ROUNDS as u64);
}

/// A worker stopped early keeps serving until every peer is done, and its
/// history still ends at its final clock.
#[test]
fn test_stop_before_peer_done() {
    let sink = MemorySink::new();
    let mut nodes = group(&[0, 1, 2], 8, &sink);
    let mut peer = nodes.remove(2);
    let mut worker = nodes.remove(1);
    let mut coordinator = nodes.remove(0);

    let handle = thread::spawn(move || {
        let history = bank::run_worker(&mut worker, 10)?;
        Ok::<_, Error>((history, worker.time()))
    });

    // Peer 2 only plays its part by hand
    peer.tick();
    let info = peer.started_info(0);
    peer.send(1, &Message::Started(info)).unwrap();

    coordinator.expect_from(1, MessageKind::Started, "test").unwrap();
    coordinator.clock_mut().observe(5);
    coordinator.multicast(&Message::Stop).unwrap();
    coordinator.expect_from(1, MessageKind::Done, "test").unwrap();

    thread::sleep(Duration::from_millis(30));
    assert!(!handle.is_finished(), "worker left before every peer was done");

    peer.clock_mut().observe(20);
    peer.send(1, &Message::Done(DoneInfo { id: 2, balance: 0 })).unwrap();

    let (history, final_clock) = handle.join().unwrap().unwrap();
    assert_eq!(final_clock, 22);
    assert_eq!(history.len() as Timestamp, final_clock + 1);
    assert!(history.entries().iter().all(|s| s.balance == 10));

    let shipped = coordinator
        .expect_from(1, MessageKind::BalanceHistory, "test")
        .unwrap();
    assert_eq!(shipped.message, Message::BalanceHistory(history));
}

/// The coordinator refuses anything but an Ack while a transfer is in flight.
#[test]
fn test_transfer_answered_without_ack() {
    let sink = MemorySink::new();
    let mut nodes = group(&[0, 1, 2], 8, &sink);
    let mut coordinator = nodes.remove(0);

    for node in nodes.iter_mut() {
        node.tick();
        let info = node.started_info(10);
        node.send(0, &Message::Started(info)).unwrap();
    }
    nodes[1].send(0, &Message::Stop).unwrap();

    let mut driver = |teller: &mut Teller<'_>, _workers: usize| teller.transfer(1, 2, 5);
    let result = bank::run_coordinator(&mut coordinator, &mut driver);

    assert!(matches!(
        result,
        Err(Error::Protocol(ProtocolError::UnexpectedMessage {
            local: 0,
            state: "transfer",
            from: 2,
            kind: MessageKind::Stop,
        }))
    ));
}

/// Drivers cannot name the coordinator, a missing worker or a self transfer.
#[test]
fn test_driver_rejects_bad_orders() {
    for (src, dst) in [(0, 1), (1, 9), (2, 2)] {
        let sink = MemorySink::new();
        let mut nodes = group(&[0, 1, 2], 8, &sink);
        let mut coordinator = nodes.remove(0);

        for node in nodes.iter_mut() {
            let info = node.started_info(10);
            node.send(0, &Message::Started(info)).unwrap();
        }

        let mut driver = move |teller: &mut Teller<'_>, _workers: usize| teller.transfer(src, dst, 1);
        let result = bank::run_coordinator(&mut coordinator, &mut driver);

        let expected_protocol_error = matches!(
            result,
            Err(Error::Protocol(ProtocolError::UnknownPeer { .. }))
                | Err(Error::Protocol(ProtocolError::SelfTransfer(_)))
        );
        assert!(expected_protocol_error, "order {}->{} was accepted", src, dst);
    }
}
