use std::collections::HashMap;

use crate::calendar::{Appointment, Calendar};
use crate::message::EventRecord;

/// Outcome of installing a learned value into the log.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InstallOutcome {
    /// The log actually changed (first time this index was filled).
    pub installed: bool,
    /// Indices that had to be padded with placeholders and still need
    /// backfilling; the caller requests them from peers.
    pub missing: Vec<u64>,
}

/// The node's replicated state: the committed log and the calendar derived
/// from it.
///
/// The calendar always equals the ADD/DELETE fold over `log[0..applied_len)`.
/// `applied_len` only advances over the dense prefix, so entries learned
/// beyond a gap wait until the gap fills before they are replayed. All
/// mutation goes through the learner under the orchestrator's lock.
#[derive(Debug)]
pub struct ReplicaState {
    pub log: Vec<Option<EventRecord>>,
    pub calendar: Calendar,
    applied_len: usize,
    next_appt_seq: u64,
}

impl ReplicaState {
    pub fn new(node_count: usize) -> Self {
        Self {
            log: Vec::new(),
            calendar: Calendar::new(node_count),
            applied_len: 0,
            next_appt_seq: 1,
        }
    }

    /// Restore from persisted state. The grid is rebuilt from the appointment
    /// map; the applied watermark resumes at the dense prefix, matching what
    /// the persisted calendar reflects.
    pub fn restore(
        node_count: usize,
        log: Vec<Option<EventRecord>>,
        appointments: HashMap<String, Appointment>,
    ) -> Self {
        let applied_len = log.iter().take_while(|entry| entry.is_some()).count();
        let next_appt_seq = log.len() as u64 + 1;
        Self {
            log,
            calendar: Calendar::from_appointments(node_count, appointments),
            applied_len,
            next_appt_seq,
        }
    }

    pub fn applied_len(&self) -> usize {
        self.applied_len
    }

    /// The committed entry at `log_id`, if this node has learned it.
    pub fn committed(&self, log_id: u64) -> Option<&EventRecord> {
        self.log.get(log_id as usize).and_then(|entry| entry.as_ref())
    }

    /// Indices inside the log that are still placeholder gaps.
    pub fn holes(&self) -> Vec<u64> {
        self.log
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_none())
            .map(|(i, _)| i as u64)
            .collect()
    }

    /// Idempotently install a learned value at `log_id`.
    ///
    /// Extends the log with placeholders when the index is past the tail,
    /// fills a placeholder in place, and leaves an already-filled index
    /// untouched. Replay into the calendar happens here, in log order.
    pub fn install(&mut self, log_id: u64, record: &EventRecord) -> InstallOutcome {
        let index = log_id as usize;
        let mut outcome = InstallOutcome::default();

        while self.log.len() < index {
            outcome.missing.push(self.log.len() as u64);
            self.log.push(None);
        }

        if self.log.len() == index {
            self.log.push(Some(record.clone()));
            outcome.installed = true;
        } else if self.log[index].is_none() {
            self.log[index] = Some(record.clone());
            outcome.installed = true;
        }

        if outcome.installed {
            self.advance_applied();
        }
        outcome
    }

    fn advance_applied(&mut self) {
        while let Some(Some(record)) = self.log.get(self.applied_len) {
            let record = record.clone();
            self.calendar.apply(&record);
            self.applied_len += 1;
        }
    }

    /// Mint the next locally unique appointment id: "n{node:03}a{seq:04}".
    pub fn next_appt_id(&mut self, node_id: u64) -> String {
        let id = format!("n{:03}a{:04}", node_id, self.next_appt_seq);
        self.next_appt_seq += 1;
        id
    }
}
