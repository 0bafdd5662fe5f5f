use crate::message::{PaxosMessage, NULL_ID};
use crate::paxos::state::{InstallOutcome, ReplicaState};

/// Handle LEARNER_NOTICE: install the chosen value at its log index and
/// replay it into the calendar. Applies to every notice regardless of which
/// node drove the round; duplicates are no-ops.
pub fn handle_notice(state: &mut ReplicaState, msg: &PaxosMessage, my_id: u64) -> InstallOutcome {
    let Some(record) = &msg.record else {
        tracing::warn!(node_id = my_id, log_id = msg.log_id, "Learner notice without a value");
        return InstallOutcome::default();
    };

    let outcome = state.install(msg.log_id, record);
    if outcome.installed {
        tracing::debug!(
            node_id = my_id,
            log_id = msg.log_id,
            origin = record.origin_node,
            applied_len = state.applied_len(),
            "Learned value installed"
        );
    }
    outcome
}

/// Handle LEARNER_REQUEST: reply with the committed entry at the requested
/// index if this node has it, otherwise stay silent.
pub fn handle_request(
    state: &ReplicaState,
    msg: &PaxosMessage,
    my_id: u64,
) -> Option<PaxosMessage> {
    let record = state.committed(msg.log_id)?;
    Some(PaxosMessage::learner_notice(
        NULL_ID,
        msg.log_id,
        my_id,
        record.clone(),
    ))
}
