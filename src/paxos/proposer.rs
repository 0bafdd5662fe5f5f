use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::message::{EventRecord, MessageKind, PaxosMessage, NULL_ID};
use crate::net::Transport;

/// Result of one full proposal round.
///
/// `Chosen` means consensus was reached for the slot; `own_value_chosen`
/// distinguishes winning with our candidate from carrying a competitor's
/// value forward, which the caller must treat as losing the slot race.
#[derive(Debug)]
pub enum RoundOutcome {
    Chosen {
        record: EventRecord,
        own_value_chosen: bool,
    },
    PrepareTimeout,
    ProposeTimeout,
}

/// Routes inbound PROMISE/ACCEPT replies to the round in flight.
///
/// Exactly one round is open at a time; replies whose proposal id does not
/// match it belong to a previous or abandoned round and are dropped here, so
/// a timed-out round leaves no lingering obligation.
#[derive(Clone, Default)]
pub struct ReplyRouter {
    inner: Arc<Mutex<Option<RoundMailbox>>>,
}

struct RoundMailbox {
    prepare_id: i64,
    tx: mpsc::UnboundedSender<PaxosMessage>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the listener for every PROMISE/ACCEPT.
    pub fn deliver(&self, msg: PaxosMessage) {
        let inner = self.inner.lock().expect("reply router poisoned");
        match inner.as_ref() {
            Some(mailbox) if mailbox.prepare_id == msg.proposal_id => {
                let _ = mailbox.tx.send(msg);
            }
            _ => {
                tracing::trace!(
                    proposal_id = msg.proposal_id,
                    sender = msg.sender,
                    "Dropping reply from an abandoned round"
                );
            }
        }
    }

    fn open(&self, prepare_id: i64) -> mpsc::UnboundedReceiver<PaxosMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("reply router poisoned");
        *inner = Some(RoundMailbox { prepare_id, tx });
        rx
    }

    fn close(&self) {
        let mut inner = self.inner.lock().expect("reply router poisoned");
        *inner = None;
    }
}

/// Majority bookkeeping for one round: who promised, who accepted, and the
/// highest-numbered previously accepted value observed so far.
#[derive(Debug)]
pub struct RoundTally {
    prepare_id: i64,
    promised: HashSet<u64>,
    accepted: HashSet<u64>,
    best_accepted_id: i64,
    adopted: Option<EventRecord>,
}

impl RoundTally {
    pub fn new(prepare_id: i64) -> Self {
        Self {
            prepare_id,
            promised: HashSet::new(),
            accepted: HashSet::new(),
            best_accepted_id: NULL_ID,
            adopted: None,
        }
    }

    /// Fold one reply in. Replies for other proposal ids are inert.
    pub fn observe(&mut self, msg: &PaxosMessage) {
        if msg.proposal_id != self.prepare_id {
            return;
        }
        match msg.kind {
            MessageKind::Promise => {
                self.promised.insert(msg.sender);
                if msg.accepted_id != NULL_ID && msg.accepted_id > self.best_accepted_id {
                    if let Some(record) = &msg.record {
                        self.best_accepted_id = msg.accepted_id;
                        self.adopted = Some(record.clone());
                    }
                }
            }
            MessageKind::Accept => {
                self.accepted.insert(msg.sender);
            }
            _ => {}
        }
    }

    pub fn promise_count(&self) -> usize {
        self.promised.len()
    }

    pub fn accept_count(&self) -> usize {
        self.accepted.len()
    }

    /// The value this round is bound to carry forward, if any acceptor
    /// reported one (standard Paxos safety rule).
    pub fn adopted(&self) -> Option<&EventRecord> {
        self.adopted.as_ref()
    }
}

/// The active role: drives one slot to consensus per call.
///
/// Prepare ids start at the node id and move in node-count strides, so every
/// node proposes from its own residue class and ids never collide across the
/// cluster.
pub struct Proposer {
    node_id: u64,
    stride: i64,
    majority: usize,
    round_timeout: Duration,
    prepare_id: i64,
    router: ReplyRouter,
}

impl Proposer {
    pub fn new(node_id: u64, node_count: usize, majority: usize, round_timeout: Duration) -> Self {
        Self {
            node_id,
            stride: node_count as i64,
            majority,
            round_timeout,
            prepare_id: node_id as i64,
            router: ReplyRouter::new(),
        }
    }

    /// Shared handle for the listener to feed replies through.
    pub fn router(&self) -> ReplyRouter {
        self.router.clone()
    }

    pub fn prepare_id(&self) -> i64 {
        self.prepare_id
    }

    /// Reset all round state, used when moving to a different log slot.
    pub fn restart(&mut self) {
        self.prepare_id = self.node_id as i64;
    }

    /// Move to the next proposal id in this node's residue class, used when
    /// retrying the same slot after a failed round.
    pub fn bump_prepare_id(&mut self) {
        self.prepare_id += self.stride;
    }

    /// Drive one full round for `(log_id, candidate)`: prepare, propose,
    /// notify. Blocks the caller until the round succeeds or a majority wait
    /// times out. On success the proposer resets for the next operation; on
    /// timeout the caller decides whether to restride or restart.
    pub async fn run_round(
        &mut self,
        transport: &Transport,
        log_id: u64,
        candidate: &EventRecord,
    ) -> RoundOutcome {
        let prepare_id = self.prepare_id;
        let mut tally = RoundTally::new(prepare_id);
        // Open the mailbox before the first send so loopback replies route.
        let mut rx = self.router.open(prepare_id);

        tracing::debug!(node_id = self.node_id, log_id, prepare_id, "Starting prepare phase");
        transport
            .broadcast(&PaxosMessage::prepare(prepare_id, log_id, self.node_id))
            .await;

        let deadline = Instant::now() + self.round_timeout;
        while tally.promise_count() < self.majority {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(msg)) => tally.observe(&msg),
                Ok(None) | Err(_) => break,
            }
        }
        if tally.promise_count() < self.majority {
            self.router.close();
            tracing::debug!(
                node_id = self.node_id,
                log_id,
                prepare_id,
                promises = tally.promise_count(),
                needed = self.majority,
                "Prepare phase timed out"
            );
            return RoundOutcome::PrepareTimeout;
        }

        let adopted = tally.adopted().cloned();
        let value = adopted.unwrap_or_else(|| candidate.clone());
        // Success means the original candidate was chosen, not merely that
        // some value was; an adopted value can still be our own if another
        // proposer carried it forward.
        let own_value_chosen = value == *candidate;
        if !own_value_chosen {
            tracing::debug!(
                node_id = self.node_id,
                log_id,
                prepare_id,
                "Carrying forward a previously accepted value"
            );
        }

        transport
            .broadcast(&PaxosMessage::propose(
                prepare_id,
                log_id,
                self.node_id,
                value.clone(),
            ))
            .await;

        let deadline = Instant::now() + self.round_timeout;
        while tally.accept_count() < self.majority {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(msg)) => tally.observe(&msg),
                Ok(None) | Err(_) => break,
            }
        }
        if tally.accept_count() < self.majority {
            self.router.close();
            tracing::debug!(
                node_id = self.node_id,
                log_id,
                prepare_id,
                accepts = tally.accept_count(),
                needed = self.majority,
                "Propose phase timed out"
            );
            return RoundOutcome::ProposeTimeout;
        }

        transport
            .broadcast(&PaxosMessage::learner_notice(
                prepare_id,
                log_id,
                self.node_id,
                value.clone(),
            ))
            .await;
        self.router.close();
        self.restart();

        tracing::debug!(node_id = self.node_id, log_id, prepare_id, own_value_chosen, "Round chosen");
        RoundOutcome::Chosen {
            record: value,
            own_value_chosen,
        }
    }
}
