//! Session and student identifiers.
//!
//! Both are opaque strings on the wire. `StudentId` is self-reported by the claiming device and
//! is never verified here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Session ID: generated when a session starts, stable for the session's lifetime.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh session ID: `SES` followed by eight uppercase hex digits.
    pub fn generate() -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        SessionId(format!("SES{}", raw[..8].to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Student ID as supplied by the student device.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for StudentId {
    fn from(s: &str) -> Self {
        StudentId(s.to_owned())
    }
}

impl From<String> for StudentId {
    fn from(s: String) -> Self {
        StudentId(s)
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_ids_have_prefix_and_differ() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert!(a.as_str().starts_with("SES"));
        assert_eq!(a.as_str().len(), 11);
        assert_ne!(a, b);
    }

    #[test]
    fn blank_student_id_is_empty() {
        assert!(StudentId::from("  ").is_empty());
        assert!(!StudentId::from("STU42").is_empty());
    }
}
