//! Per-target build records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to one target during one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub target_name: String,
    pub status: BuildStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl BuildRecord {
    pub fn pending(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            status: BuildStatus::Pending,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = BuildStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Move to a terminal status
    pub fn finish(&mut self, status: BuildStatus) {
        let now = Utc::now();
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.status = status;
        self.ended_at = Some(now);
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// Status of a target within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Install marker present, build not invoked
    Skipped,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl Default for BuildStatus {
    fn default() -> Self {
        Self::Pending
    }
}
