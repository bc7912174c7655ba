//! Application-level role selection. At most one role runs per [`App`]; activating one
//! deactivates the other first.

use std::fmt;
use std::str::FromStr;

use rollcall_core::{PresenceRecord, ProtocolConfig, SessionConfig};

use crate::error::HostError;
use crate::lecturer::LecturerSession;
use crate::student::StudentAgent;
use crate::transport::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Lecturer,
    Student,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown mode {0:?} (expected host|lecturer or join|student)")]
pub struct ParseModeError(String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" | "lecturer" => Ok(Mode::Lecturer),
            "join" | "student" => Ok(Mode::Student),
            _ => Err(ParseModeError(s.to_owned())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Lecturer => "lecturer",
            Mode::Student => "student",
        })
    }
}

enum ActiveRole {
    Lecturer(LecturerSession),
    Student(StudentAgent),
}

/// Owns whichever role is active on this device.
pub struct App<N: Network> {
    network: N,
    protocol: ProtocolConfig,
    active: Option<ActiveRole>,
}

impl<N: Network> App<N> {
    pub fn new(network: N, protocol: ProtocolConfig) -> Self {
        Self {
            network,
            protocol,
            active: None,
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        match self.active {
            Some(ActiveRole::Lecturer(_)) => Some(Mode::Lecturer),
            Some(ActiveRole::Student(_)) => Some(Mode::Student),
            None => None,
        }
    }

    /// Switch to the lecturer role and start a session.
    pub async fn host(&mut self, config: SessionConfig) -> Result<&mut LecturerSession, HostError> {
        self.deactivate().await?;
        let session =
            LecturerSession::start(&self.network, self.protocol.clone(), config).await?;
        tracing::info!(session_id = %session.session_id(), "lecturer role active");
        let active = self.active.insert(ActiveRole::Lecturer(session));
        match active {
            ActiveRole::Lecturer(s) => Ok(s),
            ActiveRole::Student(_) => Err(HostError::Stopped),
        }
    }

    /// Switch to the student role and start discovery.
    pub async fn join(&mut self) -> Result<&mut StudentAgent, HostError> {
        self.deactivate().await?;
        let agent = StudentAgent::start_discovery(&self.network, self.protocol.clone()).await?;
        tracing::info!("student role active");
        let active = self.active.insert(ActiveRole::Student(agent));
        match active {
            ActiveRole::Student(a) => Ok(a),
            ActiveRole::Lecturer(_) => Err(HostError::Stopped),
        }
    }

    pub fn lecturer(&self) -> Option<&LecturerSession> {
        match &self.active {
            Some(ActiveRole::Lecturer(s)) => Some(s),
            _ => None,
        }
    }

    pub fn student(&self) -> Option<&StudentAgent> {
        match &self.active {
            Some(ActiveRole::Student(a)) => Some(a),
            _ => None,
        }
    }

    /// Stop the active role, releasing its endpoint. Returns the roster when a session ended.
    pub async fn deactivate(&mut self) -> Result<Option<Vec<PresenceRecord>>, HostError> {
        match self.active.take() {
            Some(ActiveRole::Lecturer(mut session)) => Ok(Some(session.end().await?)),
            Some(ActiveRole::Student(mut agent)) => {
                agent.stop().await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
