//! Discovery and confirmation agent (student role).
//!
//! States: `Stopped <-> Discovering`. While discovering, every session broadcast upserts a
//! [`DiscoveredSession`] keyed by session ID; [`DiscoveryAgent::confirm_presence`] builds the
//! presence claim and the matching ack moves the claim status to `Confirmed`.

use std::net::SocketAddr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ProtocolConfig;
use crate::identity::{SessionId, StudentId};
use crate::protocol::{Message, Outbound, PresenceClaim};
use crate::wire::{self, EncodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Stopped,
    Discovering,
}

/// Student's local view of a session it has heard broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredSession {
    pub session_id: SessionId,
    pub listen_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Address the latest broadcast came from. Display only; claims are broadcast.
    pub origin_address: SocketAddr,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Local status of the most recent presence claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ClaimStatus {
    /// No claim sent yet.
    Idle,
    #[serde(rename_all = "camelCase")]
    Pending {
        session_id: SessionId,
        student_id: StudentId,
        sent_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Confirmed {
        session_id: SessionId,
        student_id: StudentId,
        /// Session ID carried by the ack.
        acked_by: SessionId,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        session_id: SessionId,
        student_id: StudentId,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    TimedOut {
        session_id: SessionId,
        student_id: StudentId,
    },
}

/// What an inbound datagram did to the agent's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    SessionDiscovered(SessionId),
    SessionRefreshed(SessionId),
    Confirmed(SessionId),
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfirmError {
    #[error("discovery is not running")]
    NotDiscovering,
    #[error("student id is empty")]
    EmptyStudentId,
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("claim encode failed: {0}")]
    Encode(#[from] EncodeError),
}

/// Owns the discovered-session set and the claim status.
pub struct DiscoveryAgent {
    protocol: ProtocolConfig,
    state: DiscoveryState,
    sessions: Vec<DiscoveredSession>,
    claim: ClaimStatus,
}

impl DiscoveryAgent {
    pub fn new(protocol: ProtocolConfig) -> Self {
        Self {
            protocol,
            state: DiscoveryState::Stopped,
            sessions: Vec::new(),
            claim: ClaimStatus::Idle,
        }
    }

    /// Host bound the student endpoint: `Stopped -> Discovering`. Returns whether state changed.
    pub fn start(&mut self) -> bool {
        if self.state == DiscoveryState::Discovering {
            return false;
        }
        self.state = DiscoveryState::Discovering;
        info!("discovery started");
        true
    }

    /// `Discovering -> Stopped`; forgets all discovered sessions. Idempotent.
    pub fn stop(&mut self) -> bool {
        if self.state == DiscoveryState::Stopped {
            return false;
        }
        self.state = DiscoveryState::Stopped;
        self.sessions.clear();
        info!("discovery stopped");
        true
    }

    /// Process one inbound datagram: session broadcasts and presence acks.
    pub fn on_datagram(&mut self, bytes: &[u8], origin: SocketAddr, now: DateTime<Utc>) -> Inbound {
        if self.state != DiscoveryState::Discovering {
            debug!(%origin, "dropping datagram: not discovering");
            return Inbound::Ignored;
        }
        match wire::decode_message(bytes) {
            Ok(Message::SessionBroadcast(b)) => {
                let known = self.sessions.iter_mut().find(|s| s.session_id == b.session_id);
                if let Some(known) = known {
                    known.last_seen_at = now;
                    known.listen_port = b.listen_port;
                    known.origin_address = origin;
                    if b.label.is_some() {
                        known.label = b.label;
                    }
                    return Inbound::SessionRefreshed(b.session_id);
                }
                info!(
                    session_id = %b.session_id,
                    listen_port = b.listen_port,
                    %origin,
                    "session discovered"
                );
                self.sessions.push(DiscoveredSession {
                    session_id: b.session_id.clone(),
                    listen_port: b.listen_port,
                    label: b.label,
                    origin_address: origin,
                    first_seen_at: now,
                    last_seen_at: now,
                });
                Inbound::SessionDiscovered(b.session_id)
            }
            Ok(Message::PresenceAck(ack)) => {
                let claimed = match &self.claim {
                    ClaimStatus::Idle => None,
                    ClaimStatus::Pending { session_id, student_id, .. }
                    | ClaimStatus::Confirmed { session_id, student_id, .. }
                    | ClaimStatus::Failed { session_id, student_id, .. }
                    | ClaimStatus::TimedOut { session_id, student_id } => {
                        Some((session_id.clone(), student_id.clone()))
                    }
                };
                let Some((session_id, student_id)) = claimed else {
                    debug!(%origin, acked_by = %ack.session_id, "ack without a claim");
                    return Inbound::Ignored;
                };
                if ack.session_id != session_id {
                    debug!(
                        claimed = %session_id,
                        acked_by = %ack.session_id,
                        "ack from a different session"
                    );
                }
                info!(session_id = %session_id, student_id = %student_id, "presence confirmed");
                self.claim = ClaimStatus::Confirmed {
                    session_id,
                    student_id,
                    acked_by: ack.session_id.clone(),
                };
                Inbound::Confirmed(ack.session_id)
            }
            Ok(Message::PresenceClaim(_)) => {
                debug!(%origin, "ignoring presence claim on student endpoint");
                Inbound::Ignored
            }
            Err(e) => {
                debug!(%origin, error = %e, "dropping malformed datagram");
                Inbound::Ignored
            }
        }
    }

    /// Build a presence claim for `target`. Status becomes `Pending` immediately.
    ///
    /// The claim goes to the broadcast address at the session's listen port; the lecturer's
    /// unicast address is not known.
    pub fn confirm_presence(
        &mut self,
        student_id: &StudentId,
        target: &DiscoveredSession,
        now: DateTime<Utc>,
    ) -> Result<Outbound, ConfirmError> {
        if self.state != DiscoveryState::Discovering {
            return Err(ConfirmError::NotDiscovering);
        }
        if student_id.is_empty() {
            return Err(ConfirmError::EmptyStudentId);
        }
        let claim = Message::PresenceClaim(PresenceClaim {
            id: student_id.clone(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        let payload = wire::encode_message(&claim)?;
        self.claim = ClaimStatus::Pending {
            session_id: target.session_id.clone(),
            student_id: student_id.clone(),
            sent_at: now,
        };
        debug!(session_id = %target.session_id, %student_id, "claim pending");
        Ok(Outbound {
            payload,
            dest: SocketAddr::from((self.protocol.broadcast_addr, target.listen_port)),
        })
    }

    /// Same as [`confirm_presence`](Self::confirm_presence), looking the target up by ID.
    pub fn confirm_presence_by_id(
        &mut self,
        student_id: &StudentId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Outbound, ConfirmError> {
        let target = self
            .session(session_id)
            .cloned()
            .ok_or_else(|| ConfirmError::UnknownSession(session_id.clone()))?;
        self.confirm_presence(student_id, &target, now)
    }

    /// Host failed to send the pending claim.
    pub fn on_send_failed(&mut self, reason: impl ToString) {
        if let ClaimStatus::Pending {
            session_id,
            student_id,
            ..
        } = &self.claim
        {
            self.claim = ClaimStatus::Failed {
                session_id: session_id.clone(),
                student_id: student_id.clone(),
                reason: reason.to_string(),
            };
        }
    }

    /// Periodic housekeeping: claim timeout and stale-session pruning, both only when configured.
    /// Returns whether anything changed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if let (Some(timeout), ClaimStatus::Pending { session_id, student_id, sent_at }) =
            (self.protocol.claim_timeout, &self.claim)
        {
            if elapsed(*sent_at, now) >= timeout {
                info!(session_id = %session_id, "claim timed out");
                self.claim = ClaimStatus::TimedOut {
                    session_id: session_id.clone(),
                    student_id: student_id.clone(),
                };
                changed = true;
            }
        }
        if let Some(stale) = self.protocol.session_stale_after {
            let before = self.sessions.len();
            self.sessions.retain(|s| elapsed(s.last_seen_at, now) < stale);
            if self.sessions.len() != before {
                debug!(pruned = before - self.sessions.len(), "pruned stale sessions");
                changed = true;
            }
        }
        changed
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn is_discovering(&self) -> bool {
        self.state == DiscoveryState::Discovering
    }

    /// Discovered sessions in first-seen order.
    pub fn sessions(&self) -> &[DiscoveredSession] {
        &self.sessions
    }

    pub fn session(&self, id: &SessionId) -> Option<&DiscoveredSession> {
        self.sessions.iter().find(|s| &s.session_id == id)
    }

    pub fn claim_status(&self) -> &ClaimStatus {
        &self.claim
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (now - since).to_std().unwrap_or_default()
}
