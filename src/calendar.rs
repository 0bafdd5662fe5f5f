use std::collections::HashMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::message::{EventRecord, Operation};

pub const DAYS: usize = 7;
pub const SLOTS_PER_DAY: usize = 48;

pub const DAY_NAMES: [&str; DAYS] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// An agreed meeting. Immutable once created by its origin node.
///
/// `start..=end` is an inclusive slot range. `participants` hold node ids,
/// which double as the calendar's participant planes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub name: String,
    pub day: usize,
    pub start: usize,
    pub end: usize,
    pub participants: Vec<u64>,
    pub creator_node: u64,
}

impl Appointment {
    /// Bounds check against the calendar dimensions and cluster size.
    pub fn in_bounds(&self, node_count: usize) -> bool {
        self.day < DAYS
            && self.start <= self.end
            && self.end < SLOTS_PER_DAY
            && !self.participants.is_empty()
            && self.participants.iter().all(|p| (*p as usize) < node_count)
    }
}

/// Derived calendar state: the appointment map plus a per-participant
/// occupancy grid. Always equals the ADD/DELETE fold over the applied log
/// prefix; it is rebuilt, never persisted as the source of truth.
#[derive(Debug, Clone)]
pub struct Calendar {
    appointments: HashMap<String, Appointment>,
    grid: Vec<Vec<Vec<Option<String>>>>,
}

impl Calendar {
    pub fn new(node_count: usize) -> Self {
        Self {
            appointments: HashMap::new(),
            grid: vec![vec![vec![None; SLOTS_PER_DAY]; DAYS]; node_count],
        }
    }

    /// Rebuild from a restored appointment map; the grid is re-derived.
    pub fn from_appointments(node_count: usize, appointments: HashMap<String, Appointment>) -> Self {
        let mut calendar = Self::new(node_count);
        for appointment in appointments.into_values() {
            calendar.insert(appointment);
        }
        calendar
    }

    pub fn appointments(&self) -> &HashMap<String, Appointment> {
        &self.appointments
    }

    pub fn get(&self, id: &str) -> Option<&Appointment> {
        self.appointments.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.appointments.contains_key(id)
    }

    pub fn occupant(&self, participant: u64, day: usize, slot: usize) -> Option<&str> {
        self.grid
            .get(participant as usize)?
            .get(day)?
            .get(slot)?
            .as_deref()
    }

    /// Best-effort pre-check: any participant already booked in the window?
    pub fn has_conflict(&self, appointment: &Appointment) -> bool {
        self.window_conflicts(
            appointment.day,
            appointment.start,
            appointment.end,
            &appointment.participants,
        )
    }

    pub fn window_conflicts(
        &self,
        day: usize,
        start: usize,
        end: usize,
        participants: &[u64],
    ) -> bool {
        participants.iter().any(|p| {
            (start..=end).any(|slot| self.grid[*p as usize][day][slot].is_some())
        })
    }

    /// One fold step over a committed record.
    pub fn apply(&mut self, record: &EventRecord) {
        match record.operation {
            Operation::Add => self.insert(record.appointment.clone()),
            Operation::Delete => self.remove(&record.appointment),
        }
    }

    fn insert(&mut self, appointment: Appointment) {
        for p in &appointment.participants {
            for slot in appointment.start..=appointment.end {
                self.grid[*p as usize][appointment.day][slot] = Some(appointment.id.clone());
            }
        }
        self.appointments.insert(appointment.id.clone(), appointment);
    }

    fn remove(&mut self, appointment: &Appointment) {
        for p in &appointment.participants {
            for slot in appointment.start..=appointment.end {
                self.grid[*p as usize][appointment.day][slot] = None;
            }
        }
        self.appointments.remove(&appointment.id);
    }

    /// Timetable view for one participant: one row per day, one column per slot.
    pub fn format_by_slot(&self, participant: u64) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Participant: {}", participant);
        let _ = write!(out, "day/time ");
        for slot in 0..SLOTS_PER_DAY {
            let _ = write!(out, "{:>10} ", slot);
        }
        let _ = writeln!(out);
        for day in 0..DAYS {
            let _ = write!(out, "{:>8} ", day);
            for slot in 0..SLOTS_PER_DAY {
                let cell = self.occupant(participant, day, slot).unwrap_or("");
                let _ = write!(out, "{:>10} ", cell);
            }
            let _ = writeln!(out);
        }
        out
    }

    /// Appointment-detail view for one participant, walked in slot order.
    pub fn format_appointments(&self, participant: u64) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Participant: {}", participant);
        for day in 0..DAYS {
            let _ = writeln!(out, "------- {} ------", DAY_NAMES[day]);
            let mut previous = "";
            for slot in 0..SLOTS_PER_DAY {
                let Some(id) = self.occupant(participant, day, slot) else {
                    continue;
                };
                if id == previous {
                    continue;
                }
                previous = id;
                if let Some(appointment) = self.appointments.get(id) {
                    let _ = writeln!(out, "Appointment Name: {}", appointment.name);
                    let _ = writeln!(out, "Appointment ID: {}", appointment.id);
                    let _ = writeln!(out, "Start time: {}", appointment.start);
                    let _ = writeln!(out, "End time: {}", appointment.end);
                    let participants: Vec<String> = appointment
                        .participants
                        .iter()
                        .map(|p| p.to_string())
                        .collect();
                    let _ = writeln!(out, "Participants: {}", participants.join("  "));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(id: &str, day: usize, start: usize, end: usize, participants: Vec<u64>) -> Appointment {
        Appointment {
            id: id.to_string(),
            name: "meeting".to_string(),
            day,
            start,
            end,
            participants,
            creator_node: 0,
        }
    }

    fn add_record(appointment: Appointment) -> EventRecord {
        EventRecord {
            operation: Operation::Add,
            clock: 0,
            origin_node: 0,
            appointment,
        }
    }

    fn delete_record(appointment: Appointment) -> EventRecord {
        EventRecord {
            operation: Operation::Delete,
            clock: 0,
            origin_node: 0,
            appointment,
        }
    }

    #[test]
    fn add_occupies_inclusive_window() {
        let mut calendar = Calendar::new(3);
        calendar.apply(&add_record(appointment("a1", 1, 2, 4, vec![0, 1])));

        for slot in 2..=4 {
            assert_eq!(calendar.occupant(0, 1, slot), Some("a1"));
            assert_eq!(calendar.occupant(1, 1, slot), Some("a1"));
        }
        assert_eq!(calendar.occupant(0, 1, 5), None);
        assert_eq!(calendar.occupant(2, 1, 3), None);
        assert!(calendar.contains("a1"));
    }

    #[test]
    fn delete_clears_window_and_map() {
        let mut calendar = Calendar::new(3);
        let appt = appointment("a1", 1, 2, 4, vec![0, 1]);
        calendar.apply(&add_record(appt.clone()));
        calendar.apply(&delete_record(appt));

        assert!(!calendar.contains("a1"));
        for slot in 2..=4 {
            assert_eq!(calendar.occupant(0, 1, slot), None);
            assert_eq!(calendar.occupant(1, 1, slot), None);
        }
    }

    #[test]
    fn conflict_requires_shared_participant_and_overlap() {
        let mut calendar = Calendar::new(3);
        calendar.apply(&add_record(appointment("a1", 1, 2, 4, vec![0, 1])));

        // Same window, shared participant.
        assert!(calendar.has_conflict(&appointment("a2", 1, 4, 6, vec![1, 2])));
        // Same window, disjoint participants.
        assert!(!calendar.has_conflict(&appointment("a3", 1, 2, 4, vec![2])));
        // Shared participant, disjoint window.
        assert!(!calendar.has_conflict(&appointment("a4", 1, 5, 6, vec![0, 1])));
        // Shared participant, other day.
        assert!(!calendar.has_conflict(&appointment("a5", 2, 2, 4, vec![0])));
    }

    #[test]
    fn rebuild_from_map_matches_incremental_grid() {
        let mut incremental = Calendar::new(3);
        incremental.apply(&add_record(appointment("a1", 0, 0, 1, vec![0])));
        incremental.apply(&add_record(appointment("a2", 3, 10, 12, vec![1, 2])));

        let rebuilt = Calendar::from_appointments(3, incremental.appointments().clone());
        for p in 0..3u64 {
            for day in 0..DAYS {
                for slot in 0..SLOTS_PER_DAY {
                    assert_eq!(
                        incremental.occupant(p, day, slot),
                        rebuilt.occupant(p, day, slot)
                    );
                }
            }
        }
    }

    #[test]
    fn bounds_checks() {
        assert!(appointment("a", 6, 0, 47, vec![0]).in_bounds(1));
        assert!(!appointment("a", 7, 0, 1, vec![0]).in_bounds(1));
        assert!(!appointment("a", 0, 5, 4, vec![0]).in_bounds(1));
        assert!(!appointment("a", 0, 0, 48, vec![0]).in_bounds(1));
        assert!(!appointment("a", 0, 0, 1, vec![3]).in_bounds(3));
        let empty = Appointment {
            participants: vec![],
            ..appointment("a", 0, 0, 1, vec![0])
        };
        assert!(!empty.in_bounds(3));
    }
}
