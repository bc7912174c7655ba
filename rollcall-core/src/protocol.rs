//! Rollcall wire protocol: message types, well-known ports and outbound datagrams.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::{SessionId, StudentId};

/// Lecturer session endpoint. Presence claims are broadcast to this port.
pub const LECTURER_PORT: u16 = 8888;

/// Student discovery endpoint. Session broadcasts are sent to this port.
pub const STUDENT_PORT: u16 = 8887;

/// Limited-broadcast address used for session broadcasts and presence claims.
pub const BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Interval between session broadcasts.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(2);

/// All wire message types. Encoding is flat JSON text; the shapes share no discriminator, so
/// decoding is by required fields (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Lecturer -> all students, periodic.
    SessionBroadcast(SessionBroadcast),
    /// Lecturer -> claiming student.
    PresenceAck(PresenceAck),
    /// Student -> lecturer, on demand.
    PresenceClaim(PresenceClaim),
}

/// Advertise an open session and the port that accepts claims for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBroadcast {
    #[serde(rename = "type")]
    pub kind: BroadcastKind,
    pub session_id: SessionId,
    /// Older lecturer builds emit this as `port`.
    #[serde(alias = "port")]
    pub listen_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl SessionBroadcast {
    pub fn new(session_id: SessionId, listen_port: u16, label: Option<String>) -> Self {
        Self {
            kind: BroadcastKind::SessionBroadcast,
            session_id,
            listen_port,
            label,
        }
    }
}

/// Value of the broadcast's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastKind {
    #[serde(rename = "session-broadcast")]
    SessionBroadcast,
}

/// A student's assertion of attendance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceClaim {
    pub id: StudentId,
    /// ISO-8601, set by the student device. Informational only.
    pub timestamp: String,
}

/// Lecturer's confirmation that a claim was accepted or was already present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceAck {
    pub status: AckStatus,
    pub session_id: SessionId,
}

impl PresenceAck {
    pub fn success(session_id: SessionId) -> Self {
        Self {
            status: AckStatus::Success,
            session_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    #[serde(rename = "success")]
    Success,
}

/// Datagram for the host to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub payload: Vec<u8>,
    pub dest: SocketAddr,
}
