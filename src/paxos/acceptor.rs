use std::collections::HashMap;

use crate::message::{EventRecord, PaxosMessage, NULL_ID};

/// Per-slot promise/accept bookkeeping for the passive role.
///
/// Slots are created lazily on the first message for a log index and kept for
/// the life of the node; the map never grows beyond the log length seen.
#[derive(Debug, Default)]
pub struct AcceptorState {
    slots: HashMap<u64, SlotState>,
}

#[derive(Debug)]
struct SlotState {
    promised_id: i64,
    accepted_id: i64,
    accepted_record: Option<EventRecord>,
}

impl Default for SlotState {
    fn default() -> Self {
        Self {
            promised_id: NULL_ID,
            accepted_id: NULL_ID,
            accepted_record: None,
        }
    }
}

impl AcceptorState {
    pub fn promised_id(&self, log_id: u64) -> i64 {
        self.slots.get(&log_id).map_or(NULL_ID, |s| s.promised_id)
    }

    pub fn accepted_id(&self, log_id: u64) -> i64 {
        self.slots.get(&log_id).map_or(NULL_ID, |s| s.accepted_id)
    }

    pub fn accepted_record(&self, log_id: u64) -> Option<&EventRecord> {
        self.slots
            .get(&log_id)
            .and_then(|s| s.accepted_record.as_ref())
    }
}

/// Handle PREPARE: promise the proposal id unless a greater one is already
/// promised for this slot, replying with any previously accepted value so the
/// proposer can carry it forward. Stale proposals get silence, not a NACK.
pub fn handle_prepare(
    state: &mut AcceptorState,
    msg: &PaxosMessage,
    my_id: u64,
) -> Option<PaxosMessage> {
    let slot = state.slots.entry(msg.log_id).or_default();
    if msg.proposal_id < slot.promised_id {
        tracing::debug!(
            node_id = my_id,
            log_id = msg.log_id,
            proposal_id = msg.proposal_id,
            promised_id = slot.promised_id,
            "Ignoring stale prepare"
        );
        return None;
    }
    slot.promised_id = msg.proposal_id;

    Some(PaxosMessage::promise(
        msg.proposal_id,
        msg.log_id,
        slot.accepted_id,
        my_id,
        slot.accepted_record.clone(),
    ))
}

/// Handle PROPOSE: accept the value unless a greater proposal id has been
/// promised for this slot. Acceptance moves both the promise and the accept
/// to the proposal id, so neither ever goes backwards.
pub fn handle_propose(
    state: &mut AcceptorState,
    msg: &PaxosMessage,
    my_id: u64,
) -> Option<PaxosMessage> {
    let slot = state.slots.entry(msg.log_id).or_default();
    if msg.proposal_id < slot.promised_id {
        tracing::debug!(
            node_id = my_id,
            log_id = msg.log_id,
            proposal_id = msg.proposal_id,
            promised_id = slot.promised_id,
            "Rejecting stale propose"
        );
        return None;
    }
    slot.promised_id = msg.proposal_id;
    slot.accepted_id = msg.proposal_id;
    slot.accepted_record = msg.record.clone();

    Some(PaxosMessage::accept(
        msg.proposal_id,
        msg.log_id,
        my_id,
        msg.record.clone(),
    ))
}
