//! Authentication gate run before a presence claim is sent (PIN, biometric, ...).
//!
//! The protocol itself authenticates nothing; this is where a host plugs in a local check.

use rollcall_core::StudentId;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub trait PresenceGate: Send + Sync {
    fn verify(&self, student_id: &StudentId) -> Result<(), GateError>;
}

/// No local check.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PresenceGate for AllowAll {
    fn verify(&self, _student_id: &StudentId) -> Result<(), GateError> {
        Ok(())
    }
}

impl<F> PresenceGate for F
where
    F: Fn(&StudentId) -> Result<(), GateError> + Send + Sync,
{
    fn verify(&self, student_id: &StudentId) -> Result<(), GateError> {
        self(student_id)
    }
}
