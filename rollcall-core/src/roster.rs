//! Presence roster: confirmed attendees of one session, keyed by student ID, in acceptance order.

use std::collections::HashSet;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::identity::StudentId;

/// One student's confirmed attendance. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub student_id: StudentId,
    /// Where the claim arrived from.
    pub origin_address: SocketAddr,
    /// Assigned by the lecturer at acceptance.
    pub confirmed_at: DateTime<Utc>,
    /// Self-reported by the student device; kept for audit only.
    pub client_timestamp: String,
}

/// Append-only, deduplicating collection of presence records.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    records: Vec<PresenceRecord>,
    present: HashSet<StudentId>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless the student is already present. Returns whether it was inserted.
    pub fn insert(&mut self, record: PresenceRecord) -> bool {
        if !self.present.insert(record.student_id.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn contains(&self, student_id: &StudentId) -> bool {
        self.present.contains(student_id)
    }

    pub fn get(&self, student_id: &StudentId) -> Option<&PresenceRecord> {
        self.records.iter().find(|r| &r.student_id == student_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in acceptance order.
    pub fn records(&self) -> &[PresenceRecord] {
        &self.records
    }

    /// Hand off the ordered records.
    pub fn into_records(self) -> Vec<PresenceRecord> {
        self.records
    }
}
