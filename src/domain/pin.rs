//! Commit pins and their synchronization results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A full 40-character hexadecimal git commit id (stored lower-case)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitId(String);

impl CommitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl FromStr for CommitId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != 40 {
            return Err(format!(
                "'{}' is not a 40-character commit hash ({} characters)",
                trimmed,
                trimmed.len()
            ));
        }
        if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("'{}' contains non-hexadecimal characters", trimmed));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for CommitId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CommitId> for String {
    fn from(id: CommitId) -> Self {
        id.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A hard version constraint one target imposes on another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinDeclaration {
    pub downstream_target: String,
    pub upstream_target: String,
    pub expected_commit: CommitId,
}

/// Outcome of synchronizing one pin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub upstream_target: String,
    pub previous_commit: CommitId,
    pub resolved_commit: CommitId,
    pub changed: bool,
}
