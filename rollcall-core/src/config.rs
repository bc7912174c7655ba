//! Protocol parameters shared by both roles.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::protocol::{BROADCAST_ADDR, BROADCAST_INTERVAL, LECTURER_PORT, STUDENT_PORT};

/// Default number of consecutive failed broadcasts before a session reports `Degraded`.
pub const DEFAULT_DEGRADED_AFTER_FAILURES: u32 = 3;

/// Ports, addresses and the optional timeouts. Both roles must agree on the ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub lecturer_port: u16,
    pub student_port: u16,
    pub broadcast_addr: Ipv4Addr,
    pub broadcast_interval: Duration,
    pub degraded_after_failures: u32,
    /// Pending claims become `TimedOut` after this long. `None`: wait forever.
    pub claim_timeout: Option<Duration>,
    /// Discovered sessions not heard from for this long are pruned. `None`: never.
    pub session_stale_after: Option<Duration>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            lecturer_port: LECTURER_PORT,
            student_port: STUDENT_PORT,
            broadcast_addr: BROADCAST_ADDR,
            broadcast_interval: BROADCAST_INTERVAL,
            degraded_after_failures: DEFAULT_DEGRADED_AFTER_FAILURES,
            claim_timeout: None,
            session_stale_after: None,
        }
    }
}
