//! Paxos safety checks against the role handlers, without any networking.
//!
//! Two proposers race for the same log slot while message deliveries are
//! shuffled; however the interleaving falls, at most one value may ever
//! reach a majority of accepts.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use calsync::calendar::Appointment;
use calsync::message::{EventRecord, Operation, PaxosMessage};
use calsync::paxos::acceptor::{self, AcceptorState};
use calsync::paxos::proposer::RoundTally;

const ACCEPTORS: usize = 3;
const MAJORITY: usize = 2;
const LOG_ID: u64 = 0;

fn candidate(tag: &str, origin: u64) -> EventRecord {
    EventRecord {
        operation: Operation::Add,
        clock: 0,
        origin_node: origin,
        appointment: Appointment {
            id: format!("n{:03}a0001", origin),
            name: tag.to_string(),
            day: 1,
            start: 2,
            end: 4,
            participants: vec![0, 1],
            creator_node: origin,
        },
    }
}

#[derive(Debug, PartialEq)]
enum Phase {
    Preparing,
    Proposing,
}

struct SimProposer {
    node_id: u64,
    prepare_id: i64,
    candidate: EventRecord,
    tally: RoundTally,
    phase: Phase,
    proposed_value: Option<EventRecord>,
}

impl SimProposer {
    fn new(node_id: u64, candidate: EventRecord) -> Self {
        Self {
            node_id,
            prepare_id: node_id as i64,
            tally: RoundTally::new(node_id as i64),
            candidate,
            phase: Phase::Preparing,
            proposed_value: None,
        }
    }
}

/// Pending message deliveries, in no particular order.
enum Event {
    PrepareAt { proposer: usize, acceptor: usize },
    Promise { proposer: usize, msg: PaxosMessage },
    ProposeAt { proposer: usize, acceptor: usize },
    Accept { msg: PaxosMessage },
}

/// Run one shuffled interleaving; returns every value that reached a
/// majority of accepts for some proposal id.
fn run_trial(rng: &mut StdRng) -> Vec<EventRecord> {
    let mut acceptors: Vec<AcceptorState> = (0..ACCEPTORS).map(|_| AcceptorState::default()).collect();
    let mut proposers = vec![
        SimProposer::new(0, candidate("from-zero", 0)),
        SimProposer::new(1, candidate("from-one", 1)),
    ];

    let mut queue: Vec<Event> = Vec::new();
    for proposer in 0..proposers.len() {
        for acceptor in 0..ACCEPTORS {
            queue.push(Event::PrepareAt { proposer, acceptor });
        }
    }

    // (proposal id -> (accept count, value)); a slot value is chosen once a
    // majority of acceptors accept the same proposal id.
    let mut accepts: HashMap<i64, (usize, EventRecord)> = HashMap::new();
    let mut chosen: Vec<EventRecord> = Vec::new();

    while !queue.is_empty() {
        let next = rng.gen_range(0..queue.len());
        match queue.swap_remove(next) {
            Event::PrepareAt { proposer, acceptor } => {
                let p = &proposers[proposer];
                let msg = PaxosMessage::prepare(p.prepare_id, LOG_ID, p.node_id);
                if let Some(reply) =
                    acceptor::handle_prepare(&mut acceptors[acceptor], &msg, acceptor as u64)
                {
                    queue.push(Event::Promise {
                        proposer,
                        msg: reply,
                    });
                }
            }
            Event::Promise { proposer, msg } => {
                let p = &mut proposers[proposer];
                if p.phase != Phase::Preparing {
                    continue;
                }
                p.tally.observe(&msg);
                if p.tally.promise_count() >= MAJORITY {
                    p.phase = Phase::Proposing;
                    let value = p
                        .tally
                        .adopted()
                        .cloned()
                        .unwrap_or_else(|| p.candidate.clone());
                    p.proposed_value = Some(value);
                    for acceptor in 0..ACCEPTORS {
                        queue.push(Event::ProposeAt { proposer, acceptor });
                    }
                }
            }
            Event::ProposeAt { proposer, acceptor } => {
                let p = &proposers[proposer];
                let value = p.proposed_value.clone().expect("proposing without a value");
                let msg = PaxosMessage::propose(p.prepare_id, LOG_ID, p.node_id, value);
                if let Some(reply) =
                    acceptor::handle_propose(&mut acceptors[acceptor], &msg, acceptor as u64)
                {
                    queue.push(Event::Accept { msg: reply });
                }
            }
            Event::Accept { msg } => {
                let record = msg.record.clone().expect("accept carries the value");
                let entry = accepts.entry(msg.proposal_id).or_insert((0, record));
                entry.0 += 1;
                if entry.0 == MAJORITY {
                    chosen.push(entry.1.clone());
                }
            }
        }
    }

    chosen
}

#[test]
fn racing_proposers_never_choose_two_values() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut trials_with_choice = 0;

    for _ in 0..500 {
        let chosen = run_trial(&mut rng);
        if let Some(first) = chosen.first() {
            trials_with_choice += 1;
            for other in &chosen[1..] {
                assert_eq!(
                    first, other,
                    "two different values were chosen for one log slot"
                );
            }
        }
    }

    // The shuffle should produce plenty of decided trials; if not, the
    // simulation itself is broken.
    assert!(trials_with_choice > 100, "too few decided trials: {}", trials_with_choice);
}

#[test]
fn later_prepare_must_adopt_accepted_value() {
    // Proposer 0 completes a full round on a majority; proposer 1 then
    // prepares with a higher id and must carry the chosen value forward.
    let mut acceptors: Vec<AcceptorState> = (0..ACCEPTORS).map(|_| AcceptorState::default()).collect();
    let zero = candidate("from-zero", 0);

    for acceptor in [0usize, 1] {
        let prepare = PaxosMessage::prepare(0, LOG_ID, 0);
        acceptor::handle_prepare(&mut acceptors[acceptor], &prepare, acceptor as u64).unwrap();
        let propose = PaxosMessage::propose(0, LOG_ID, 0, zero.clone());
        acceptor::handle_propose(&mut acceptors[acceptor], &propose, acceptor as u64).unwrap();
    }

    let mut tally = RoundTally::new(1);
    for acceptor in [1usize, 2] {
        let prepare = PaxosMessage::prepare(1, LOG_ID, 1);
        let reply =
            acceptor::handle_prepare(&mut acceptors[acceptor], &prepare, acceptor as u64).unwrap();
        tally.observe(&reply);
    }

    assert_eq!(tally.promise_count(), 2);
    assert_eq!(tally.adopted(), Some(&zero), "the chosen value must survive");
}

#[test]
fn random_message_storm_keeps_acceptor_monotonic() {
    // Any order of prepares and proposes leaves the promise at the maximum
    // id seen, and never lets a lower id overwrite the accepted value.
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..200 {
        let mut state = AcceptorState::default();
        let mut max_seen = i64::MIN;
        for _ in 0..30 {
            let p_id = rng.gen_range(0..20) as i64;
            max_seen = max_seen.max(p_id);
            if rng.gen_bool(0.5) {
                acceptor::handle_prepare(&mut state, &PaxosMessage::prepare(p_id, 0, 0), 1);
            } else {
                let value = candidate("storm", 0);
                acceptor::handle_propose(&mut state, &PaxosMessage::propose(p_id, 0, 0, value), 1);
            }
            assert!(state.promised_id(0) <= max_seen);
            assert!(state.accepted_id(0) <= state.promised_id(0));
        }
        assert_eq!(state.promised_id(0), max_seen);
    }
}
