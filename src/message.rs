use serde::{Deserialize, Serialize};

use crate::calendar::Appointment;

/// Sentinel for "no proposal id", used where the protocol reuses an id field.
pub const NULL_ID: i64 = -1;

/// The six wire message kinds of the per-slot consensus protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Prepare,
    Promise,
    Propose,
    Accept,
    LearnerRequest,
    LearnerNotice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Add,
    Delete,
}

/// One entry of the replicated log: an appointment create or delete.
///
/// `clock` is informational only; ordering comes from the log index.
/// Equality is structural, which is what log deduplication relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub operation: Operation,
    pub clock: u64,
    pub origin_node: u64,
    pub appointment: Appointment,
}

/// A consensus message, serialized as one JSON document per connection.
///
/// `accepted_id` doubles as the promised/accepted proposal id depending on
/// the kind, with [`NULL_ID`] where it does not apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaxosMessage {
    pub kind: MessageKind,
    pub proposal_id: i64,
    pub log_id: u64,
    pub accepted_id: i64,
    pub sender: u64,
    pub record: Option<EventRecord>,
}

impl PaxosMessage {
    pub fn prepare(proposal_id: i64, log_id: u64, sender: u64) -> Self {
        Self {
            kind: MessageKind::Prepare,
            proposal_id,
            log_id,
            accepted_id: NULL_ID,
            sender,
            record: None,
        }
    }

    pub fn promise(
        proposal_id: i64,
        log_id: u64,
        accepted_id: i64,
        sender: u64,
        record: Option<EventRecord>,
    ) -> Self {
        Self {
            kind: MessageKind::Promise,
            proposal_id,
            log_id,
            accepted_id,
            sender,
            record,
        }
    }

    pub fn propose(proposal_id: i64, log_id: u64, sender: u64, record: EventRecord) -> Self {
        Self {
            kind: MessageKind::Propose,
            proposal_id,
            log_id,
            accepted_id: NULL_ID,
            sender,
            record: Some(record),
        }
    }

    pub fn accept(proposal_id: i64, log_id: u64, sender: u64, record: Option<EventRecord>) -> Self {
        Self {
            kind: MessageKind::Accept,
            proposal_id,
            log_id,
            accepted_id: proposal_id,
            sender,
            record,
        }
    }

    pub fn learner_request(log_id: u64, sender: u64) -> Self {
        Self {
            kind: MessageKind::LearnerRequest,
            proposal_id: NULL_ID,
            log_id,
            accepted_id: NULL_ID,
            sender,
            record: None,
        }
    }

    pub fn learner_notice(proposal_id: i64, log_id: u64, sender: u64, record: EventRecord) -> Self {
        Self {
            kind: MessageKind::LearnerNotice,
            proposal_id,
            log_id,
            accepted_id: NULL_ID,
            sender,
            record: Some(record),
        }
    }
}
