//! Rollcall attendance protocol reference implementation.
//! Host-driven: no I/O; host passes datagrams, ticks and the current time, and receives
//! outbound datagrams to send.

pub mod config;
pub mod discovery;
pub mod identity;
pub mod protocol;
pub mod roster;
pub mod session;
pub mod wire;

pub use config::ProtocolConfig;
pub use discovery::{
    ClaimStatus, ConfirmError, DiscoveredSession, DiscoveryAgent, DiscoveryState, Inbound,
};
pub use identity::{SessionId, StudentId};
pub use protocol::{
    Message, Outbound, PresenceAck, PresenceClaim, SessionBroadcast, LECTURER_PORT, STUDENT_PORT,
};
pub use roster::{PresenceRecord, Roster};
pub use session::{
    Countdown, Health, SessionConfig, SessionConfigError, SessionError, SessionManager,
    SessionState,
};
pub use wire::{decode_message, encode_message, DecodeError, EncodeError};
