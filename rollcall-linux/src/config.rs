//! Load config from file and environment.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rollcall_core::ProtocolConfig;
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/rollcall/config.toml or /etc/rollcall/config.toml.
/// Env overrides: ROLLCALL_LECTURER_PORT, ROLLCALL_STUDENT_PORT, ROLLCALL_BROADCAST_ADDR,
/// ROLLCALL_STUDENT_ID.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Lecturer session port (default 8888). 0 binds any free port.
    #[serde(default = "default_lecturer_port")]
    pub lecturer_port: u16,
    /// Student discovery port (default 8887).
    #[serde(default = "default_student_port")]
    pub student_port: u16,
    /// Broadcast address (default 255.255.255.255).
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: Ipv4Addr,
    /// Session broadcast period in milliseconds (default 2000).
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    /// Consecutive failed broadcasts before reporting degraded (default 3).
    #[serde(default = "default_degraded_after_failures")]
    pub degraded_after_failures: u32,
    /// Give up on an unacknowledged claim after this many seconds. Unset: wait forever.
    #[serde(default)]
    pub claim_timeout_secs: Option<u64>,
    /// Forget discovered sessions silent for this many seconds. Unset: keep until stopped.
    #[serde(default)]
    pub session_stale_secs: Option<u64>,
    /// Student identifier used by `rollcall join`.
    #[serde(default)]
    pub student_id: Option<String>,
}

fn default_lecturer_port() -> u16 {
    rollcall_core::LECTURER_PORT
}
fn default_student_port() -> u16 {
    rollcall_core::STUDENT_PORT
}
fn default_broadcast_addr() -> Ipv4Addr {
    rollcall_core::protocol::BROADCAST_ADDR
}
fn default_broadcast_interval_ms() -> u64 {
    2000
}
fn default_degraded_after_failures() -> u32 {
    rollcall_core::config::DEFAULT_DEGRADED_AFTER_FAILURES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lecturer_port: default_lecturer_port(),
            student_port: default_student_port(),
            broadcast_addr: default_broadcast_addr(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            degraded_after_failures: default_degraded_after_failures(),
            claim_timeout_secs: None,
            session_stale_secs: None,
            student_id: None,
        }
    }
}

impl Config {
    pub fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            lecturer_port: self.lecturer_port,
            student_port: self.student_port,
            broadcast_addr: self.broadcast_addr,
            broadcast_interval: Duration::from_millis(self.broadcast_interval_ms.max(1)),
            degraded_after_failures: self.degraded_after_failures,
            claim_timeout: self.claim_timeout_secs.map(Duration::from_secs),
            session_stale_after: self.session_stale_secs.map(Duration::from_secs),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("ROLLCALL_LECTURER_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.lecturer_port = p;
    }
    if let Some(p) = var("ROLLCALL_STUDENT_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.student_port = p;
    }
    if let Some(a) = var("ROLLCALL_BROADCAST_ADDR").and_then(|s| s.parse::<Ipv4Addr>().ok()) {
        c.broadcast_addr = a;
    }
    if let Some(id) = var("ROLLCALL_STUDENT_ID").filter(|s| !s.trim().is_empty()) {
        c.student_id = Some(id);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/rollcall/config.toml"));
    }
    out.push(PathBuf::from("/etc/rollcall/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    parse_file(&path)
}

fn parse_file(path: &Path) -> Option<Config> {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "cannot read config, using defaults"
            );
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            None
        }
    }
}
