use rollcall_core::{ConfirmError, SessionConfigError, SessionError};

use crate::gate::GateError;
use crate::transport::BindError;

/// Errors surfaced to the application by the role hosts.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    SessionConfig(#[from] SessionConfigError),
    #[error(transparent)]
    Confirm(#[from] ConfirmError),
    #[error("authentication gate: {0}")]
    Gate(#[from] GateError),
    /// The role's event loop has already shut down.
    #[error("role is not running")]
    Stopped,
    #[error("event loop failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
