//! Rollcall host for Linux: transports, role event loops, config and logging around
//! [`rollcall_core`].

pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod lecturer;
pub mod logging;
pub mod memory;
pub mod mode;
pub mod student;
pub mod transport;

pub use config::Config;
pub use error::HostError;
pub use gate::{AllowAll, GateError, PresenceGate};
pub use lecturer::{LecturerSession, LecturerStatus};
pub use memory::{MemoryEndpoint, MemoryHost, MemoryNetwork};
pub use mode::{App, Mode};
pub use student::{StudentAgent, StudentStatus};
pub use transport::{BindError, Endpoint, Network, RecvError, SendError, UdpEndpoint, UdpNetwork};
