use std::net::SocketAddr;

use tokio::sync::{Mutex, RwLock};

use crate::calendar::{Appointment, DAYS, SLOTS_PER_DAY};
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::message::{EventRecord, MessageKind, Operation, PaxosMessage};
use crate::net::Transport;
use crate::paxos::acceptor::{self, AcceptorState};
use crate::paxos::backoff::random_retry_backoff;
use crate::paxos::learner;
use crate::paxos::{Proposer, ReplicaState, ReplyRouter, RoundOutcome};
use crate::storage::Storage;

/// One calendar node: composes the three consensus roles with the shared
/// replicated state, the network transport, and durable storage.
///
/// Locking: `state` (log + calendar) is the single lock for all replicated
/// data and is never held across a network send. The acceptor's slot map has
/// its own lock, and proposer reply counting goes through the reply router's
/// mailbox, so inbound handlers never contend with an in-flight round beyond
/// message delivery. Client operations serialize on the proposer lock, one
/// round in flight per node.
pub struct Node {
    config: ClusterConfig,
    transport: Transport,
    storage: Storage,
    state: RwLock<ReplicaState>,
    acceptor: Mutex<AcceptorState>,
    proposer: Mutex<Proposer>,
    router: ReplyRouter,
}

impl Node {
    /// Load persisted state and assemble the node. Unreadable prior state is
    /// fatal here: a node must not join consensus with ambiguous local state.
    pub fn new(config: ClusterConfig) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(&config.data_dir, config.node_id)?;
        let log = storage.load_log()?;
        let appointments = storage.load_appointments()?;
        let restored = log.len();
        let state = ReplicaState::restore(config.node_count(), log, appointments);
        let proposer = Proposer::new(
            config.node_id,
            config.node_count(),
            config.majority(),
            config.round_timeout(),
        );
        let router = proposer.router();
        let transport = Transport::new(&config);

        tracing::info!(
            node_id = config.node_id,
            nodes = config.node_count(),
            restored_entries = restored,
            "Node initialized"
        );
        Ok(Self {
            config,
            transport,
            storage,
            state: RwLock::new(state),
            acceptor: Mutex::new(AcceptorState::default()),
            proposer: Mutex::new(proposer),
            router,
        })
    }

    pub fn node_id(&self) -> u64 {
        self.config.node_id
    }

    pub fn cluster_size(&self) -> usize {
        self.config.node_count()
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.config.listen_addr()
    }

    /// Dispatch one inbound message to the role matching its kind. Called by
    /// the listener; the sender's connection is already gone.
    pub async fn handle_message(&self, msg: PaxosMessage) {
        match msg.kind {
            MessageKind::Prepare => {
                let reply = {
                    let mut acceptor = self.acceptor.lock().await;
                    acceptor::handle_prepare(&mut acceptor, &msg, self.config.node_id)
                };
                if let Some(reply) = reply {
                    self.transport.send_to(msg.sender, &reply).await;
                }
            }
            MessageKind::Propose => {
                let reply = {
                    let mut acceptor = self.acceptor.lock().await;
                    acceptor::handle_propose(&mut acceptor, &msg, self.config.node_id)
                };
                if let Some(reply) = reply {
                    self.transport.send_to(msg.sender, &reply).await;
                }
            }
            MessageKind::Promise | MessageKind::Accept => self.router.deliver(msg),
            MessageKind::LearnerNotice => self.apply_notice(msg).await,
            MessageKind::LearnerRequest => {
                let reply = {
                    let state = self.state.read().await;
                    learner::handle_request(&state, &msg, self.config.node_id)
                };
                if let Some(reply) = reply {
                    self.transport.send_to(msg.sender, &reply).await;
                }
            }
        }
    }

    async fn apply_notice(&self, msg: PaxosMessage) {
        let outcome = {
            let mut state = self.state.write().await;
            learner::handle_notice(&mut state, &msg, self.config.node_id)
        };
        // Lock released; now chase any gaps the install uncovered.
        for log_id in outcome.missing {
            self.transport
                .broadcast(&PaxosMessage::learner_request(log_id, self.config.node_id))
                .await;
        }
    }

    /// Create an appointment and replicate it. Returns `false` on a local
    /// conflict, a lost slot race that turned into a conflict, invalid
    /// bounds, or an exhausted retry allowance.
    pub async fn add_appointment(
        &self,
        name: &str,
        day: usize,
        start: usize,
        end: usize,
        participants: Vec<u64>,
    ) -> bool {
        let valid = day < DAYS
            && start <= end
            && end < SLOTS_PER_DAY
            && !participants.is_empty()
            && participants
                .iter()
                .all(|p| (*p as usize) < self.config.node_count());
        if !valid {
            tracing::warn!(
                node_id = self.config.node_id,
                name,
                day,
                start,
                end,
                "Rejecting appointment with out-of-range fields"
            );
            return false;
        }

        let record = {
            let mut state = self.state.write().await;
            if state
                .calendar
                .window_conflicts(day, start, end, &participants)
            {
                tracing::info!(
                    node_id = self.config.node_id,
                    name,
                    "Refusing appointment: window already booked"
                );
                return false;
            }
            let id = state.next_appt_id(self.config.node_id);
            let appointment = Appointment {
                id,
                name: name.to_string(),
                day,
                start,
                end,
                participants,
                creator_node: self.config.node_id,
            };
            EventRecord {
                operation: Operation::Add,
                clock: state.log.len() as u64,
                origin_node: self.config.node_id,
                appointment,
            }
        };

        self.replicate(record).await
    }

    /// Delete a committed appointment by id. Returns `false` when the id is
    /// unknown, when someone else's delete wins the race, or when the retry
    /// allowance runs out.
    pub async fn delete_appointment(&self, id: &str) -> bool {
        let record = {
            let state = self.state.read().await;
            let Some(appointment) = state.calendar.get(id) else {
                tracing::info!(node_id = self.config.node_id, id, "No such appointment");
                return false;
            };
            EventRecord {
                operation: Operation::Delete,
                clock: state.log.len() as u64,
                origin_node: self.config.node_id,
                appointment: appointment.clone(),
            }
        };

        self.replicate(record).await
    }

    /// Drive a record into the log: pick the tail slot, run a round, and on
    /// failure restride (same slot) or restart (slot was filled meanwhile),
    /// until the record wins, the operation becomes infeasible, or the retry
    /// allowance is spent.
    async fn replicate(&self, record: EventRecord) -> bool {
        let mut proposer = self.proposer.lock().await;
        let mut last_slot: Option<u64> = None;

        for attempt in 0..self.config.max_round_retries {
            let log_id = {
                let state = self.state.read().await;
                if Self::infeasible(&state, &record) {
                    tracing::info!(
                        node_id = self.config.node_id,
                        "Operation no longer feasible, abandoning"
                    );
                    return false;
                }
                state.log.len() as u64
            };

            match last_slot {
                Some(previous) if previous == log_id => proposer.bump_prepare_id(),
                Some(_) => proposer.restart(),
                None => {}
            }
            last_slot = Some(log_id);

            tracing::debug!(
                node_id = self.config.node_id,
                log_id,
                attempt,
                prepare_id = proposer.prepare_id(),
                "Driving proposal round"
            );
            match proposer.run_round(&self.transport, log_id, &record).await {
                RoundOutcome::Chosen {
                    own_value_chosen: true,
                    ..
                } => return true,
                RoundOutcome::Chosen {
                    own_value_chosen: false,
                    ..
                } => {
                    tracing::debug!(
                        node_id = self.config.node_id,
                        log_id,
                        "Lost the slot race, resubmitting"
                    );
                }
                RoundOutcome::PrepareTimeout | RoundOutcome::ProposeTimeout => {
                    tracing::debug!(
                        node_id = self.config.node_id,
                        log_id,
                        attempt,
                        "Round failed, retrying"
                    );
                }
            }
            // Brief jitter before the next round; also gives a winning
            // competitor's notice time to apply locally.
            tokio::time::sleep(random_retry_backoff(
                self.config.retry_backoff_min_ms,
                self.config.retry_backoff_max_ms,
            ))
            .await;
        }

        tracing::warn!(
            node_id = self.config.node_id,
            retries = self.config.max_round_retries,
            "Giving up on operation after exhausting proposal rounds"
        );
        false
    }

    fn infeasible(state: &ReplicaState, record: &EventRecord) -> bool {
        match record.operation {
            Operation::Add => state.calendar.has_conflict(&record.appointment),
            Operation::Delete => !state.calendar.contains(&record.appointment.id),
        }
    }

    /// Backfill missing log entries from peers: request every known hole and
    /// a bounded batch past the tail, sleep, and stop once a full pass makes
    /// no progress.
    pub async fn sync_missing_events(&self) {
        let my_id = self.config.node_id;
        tracing::info!(node_id = my_id, "Fetching missing events from peers");

        let mut previous = {
            let state = self.state.read().await;
            (state.log.len(), state.holes().len())
        };
        loop {
            let (tail, holes) = {
                let state = self.state.read().await;
                (state.log.len() as u64, state.holes())
            };
            let batch = tail..tail + self.config.gap_batch_size;
            for log_id in holes.into_iter().chain(batch) {
                self.transport
                    .broadcast(&PaxosMessage::learner_request(log_id, my_id))
                    .await;
            }

            tokio::time::sleep(self.config.gap_poll_interval()).await;

            let current = {
                let state = self.state.read().await;
                (state.log.len(), state.holes().len())
            };
            if current == previous {
                break;
            }
            previous = current;
        }
        tracing::info!(node_id = my_id, "All events are up to date");
    }

    /// Persist the log and appointment map. Failure here is degraded but
    /// non-fatal; the process still exits.
    pub async fn close(&self) {
        tracing::info!(node_id = self.config.node_id, "Node closing, persisting state");
        let state = self.state.read().await;
        if let Err(e) = self.storage.save(&state.log, state.calendar.appointments()) {
            tracing::warn!(
                node_id = self.config.node_id,
                error = %e,
                "Failed to persist state on shutdown"
            );
        }
    }

    // Read-only views over the replicated state.

    pub async fn calendar_by_slot(&self, participant: u64) -> String {
        self.state.read().await.calendar.format_by_slot(participant)
    }

    pub async fn calendar_appointments(&self, participant: u64) -> String {
        self.state
            .read()
            .await
            .calendar
            .format_appointments(participant)
    }

    pub async fn appointments(&self) -> Vec<Appointment> {
        self.state
            .read()
            .await
            .calendar
            .appointments()
            .values()
            .cloned()
            .collect()
    }

    pub async fn log_len(&self) -> usize {
        self.state.read().await.log.len()
    }

    pub async fn committed(&self, log_id: u64) -> Option<EventRecord> {
        self.state.read().await.committed(log_id).cloned()
    }

    pub async fn occupant(&self, participant: u64, day: usize, slot: usize) -> Option<String> {
        self.state
            .read()
            .await
            .calendar
            .occupant(participant, day, slot)
            .map(str::to_string)
    }
}
