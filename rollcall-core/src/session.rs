//! Session manager (lecturer role): session lifecycle, broadcast payload, countdown and roster.
//!
//! States: `Idle -> Active -> Ended`. `Ended` is terminal; a new session needs a new manager
//! (and so a fresh session ID). The host owns the endpoint and both timers; it calls
//! [`SessionManager::broadcast`] on every broadcast tick, [`SessionManager::countdown_tick`]
//! once per second, and [`SessionManager::on_datagram`] for every inbound datagram.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::identity::SessionId;
use crate::protocol::{Message, Outbound, PresenceAck, SessionBroadcast};
use crate::roster::{PresenceRecord, Roster};
use crate::wire::{self, EncodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Ended,
}

/// Broadcast health. Degraded is a signal only; the session keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Degraded { consecutive_failures: u32 },
}

/// Result of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    /// No duration bound was configured.
    Unbounded,
    /// Seconds left after this tick.
    Remaining(u32),
    /// Reached zero on this tick; the session has ended.
    Expired,
    /// Session is not active.
    Inactive,
}

/// Lecturer's per-session options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    pub label: Option<String>,
    /// `None`: open until explicitly ended.
    pub duration: Option<Duration>,
}

impl SessionConfig {
    /// Largest accepted countdown, in seconds.
    pub const MAX_DURATION_SECS: u32 = 30;

    /// Session that stays open until ended.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Countdown of `secs` seconds. Zero means unbounded.
    pub fn with_duration_secs(secs: u32) -> Result<Self, SessionConfigError> {
        if secs > Self::MAX_DURATION_SECS {
            return Err(SessionConfigError::DurationOutOfRange(secs));
        }
        Ok(Self {
            label: None,
            duration: (secs > 0).then(|| Duration::from_secs(u64::from(secs))),
        })
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionConfigError {
    #[error(
        "session duration {0}s out of range (0 or 1..={max})",
        max = SessionConfig::MAX_DURATION_SECS
    )]
    DurationOutOfRange(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session already started")]
    AlreadyStarted,
    #[error("session has ended")]
    Ended,
    #[error("broadcast encode failed: {0}")]
    Encode(#[from] EncodeError),
}

/// Owns one session: ID, state, countdown and roster.
pub struct SessionManager {
    id: SessionId,
    config: SessionConfig,
    protocol: ProtocolConfig,
    state: SessionState,
    listen_port: Option<u16>,
    remaining_secs: Option<u32>,
    broadcast_frame: Option<Vec<u8>>,
    consecutive_failures: u32,
    roster: Roster,
}

impl SessionManager {
    pub fn new(config: SessionConfig, protocol: ProtocolConfig) -> Self {
        Self {
            id: SessionId::generate(),
            config,
            protocol,
            state: SessionState::Idle,
            listen_port: None,
            remaining_secs: None,
            broadcast_frame: None,
            consecutive_failures: 0,
            roster: Roster::new(),
        }
    }

    /// Use a given session ID instead of a generated one.
    pub fn with_id(id: SessionId, config: SessionConfig, protocol: ProtocolConfig) -> Self {
        Self {
            id,
            ..Self::new(config, protocol)
        }
    }

    /// Host bound the listening endpoint on `listen_port`: `Idle -> Active`.
    pub fn start(&mut self, listen_port: u16) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Active => return Err(SessionError::AlreadyStarted),
            SessionState::Ended => return Err(SessionError::Ended),
        }
        let broadcast = Message::SessionBroadcast(SessionBroadcast::new(
            self.id.clone(),
            listen_port,
            self.config.label.clone(),
        ));
        self.broadcast_frame = Some(wire::encode_message(&broadcast)?);
        self.listen_port = Some(listen_port);
        self.remaining_secs = self
            .config
            .duration
            .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX));
        self.state = SessionState::Active;
        info!(
            session_id = %self.id,
            listen_port,
            duration = ?self.config.duration,
            "session active"
        );
        Ok(())
    }

    /// Session broadcast datagram for this tick. `None` unless active.
    pub fn broadcast(&self) -> Option<Outbound> {
        if self.state != SessionState::Active {
            return None;
        }
        let payload = self.broadcast_frame.clone()?;
        Some(Outbound {
            payload,
            dest: SocketAddr::from((self.protocol.broadcast_addr, self.protocol.student_port)),
        })
    }

    /// Host reports whether the last broadcast send succeeded.
    pub fn record_broadcast_result(&mut self, sent: bool) -> Health {
        if sent {
            if self.consecutive_failures >= self.degraded_threshold() {
                info!(session_id = %self.id, "broadcast recovered");
            }
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if self.consecutive_failures == self.degraded_threshold() {
                warn!(
                    session_id = %self.id,
                    failures = self.consecutive_failures,
                    "broadcast degraded"
                );
            }
        }
        self.health()
    }

    pub fn health(&self) -> Health {
        if self.consecutive_failures >= self.degraded_threshold() {
            Health::Degraded {
                consecutive_failures: self.consecutive_failures,
            }
        } else {
            Health::Healthy
        }
    }

    /// Failures before `Degraded`; a configured 0 behaves as 1.
    fn degraded_threshold(&self) -> u32 {
        self.protocol.degraded_after_failures.max(1)
    }

    /// One-second countdown tick. Ends the session when it reaches zero.
    pub fn countdown_tick(&mut self) -> Countdown {
        if self.state != SessionState::Active {
            return Countdown::Inactive;
        }
        let Some(remaining) = self.remaining_secs.as_mut() else {
            return Countdown::Unbounded;
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            info!(session_id = %self.id, "countdown expired");
            self.end();
            Countdown::Expired
        } else {
            Countdown::Remaining(*remaining)
        }
    }

    /// Process one inbound datagram. Returns the ack to send, if any.
    ///
    /// Only well-formed presence claims received while active are answered. Every such claim is
    /// acked, whether or not the student was already present.
    pub fn on_datagram(
        &mut self,
        bytes: &[u8],
        origin: SocketAddr,
        now: DateTime<Utc>,
    ) -> Option<Outbound> {
        if self.state != SessionState::Active {
            debug!(
                session_id = %self.id,
                %origin,
                state = ?self.state,
                "dropping datagram: session not active"
            );
            return None;
        }
        let claim = match wire::decode_message(bytes) {
            Ok(Message::PresenceClaim(claim)) => claim,
            Ok(other) => {
                debug!(%origin, message = ?other, "ignoring non-claim message");
                return None;
            }
            Err(e) => {
                debug!(%origin, error = %e, "dropping malformed datagram");
                return None;
            }
        };
        if claim.id.is_empty() {
            debug!(%origin, "dropping claim with empty student id");
            return None;
        }
        let inserted = self.roster.insert(PresenceRecord {
            student_id: claim.id.clone(),
            origin_address: origin,
            confirmed_at: now,
            client_timestamp: claim.timestamp,
        });
        if inserted {
            info!(
                session_id = %self.id,
                student_id = %claim.id,
                %origin,
                present = self.roster.len(),
                "student present"
            );
        } else {
            debug!(session_id = %self.id, student_id = %claim.id, "duplicate claim, re-acking");
        }
        let ack = Message::PresenceAck(PresenceAck::success(self.id.clone()));
        match wire::encode_message(&ack) {
            Ok(payload) => Some(Outbound {
                payload,
                dest: origin,
            }),
            Err(e) => {
                warn!(error = %e, "failed to encode ack");
                None
            }
        }
    }

    /// End the session. Returns whether this call transitioned it; idempotent otherwise.
    pub fn end(&mut self) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        self.state = SessionState::Ended;
        self.broadcast_frame = None;
        self.remaining_secs = None;
        info!(session_id = %self.id, present = self.roster.len(), "session ended");
        true
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    pub fn label(&self) -> Option<&str> {
        self.config.label.as_deref()
    }

    /// Seconds left on the countdown, if bounded and active.
    pub fn remaining_secs(&self) -> Option<u32> {
        self.remaining_secs
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Hand off the roster, ordered by acceptance.
    pub fn into_roster(self) -> Vec<PresenceRecord> {
        self.roster.into_records()
    }
}
