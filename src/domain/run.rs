//! Run state and reconstruction from events.
//!
//! A BuildRun is one invocation of the orchestrator over a target selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::Artifact;
use super::events::{Event, EventType};
use super::pin::SyncResult;
use super::record::{BuildRecord, BuildStatus};

/// One orchestrator run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// One record per visited target, in execution order
    pub records: Vec<BuildRecord>,

    /// Artifacts packaged during this run
    pub artifacts: Vec<Artifact>,

    /// Pin synchronizations performed before building
    pub syncs: Vec<SyncResult>,
}

impl BuildRun {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            records: Vec::new(),
            artifacts: Vec::new(),
            syncs: Vec::new(),
        }
    }

    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first = events.first()?;
        let mut run = Self::new(first.run_id);
        run.started_at = first.timestamp;

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    target: event.target.clone(),
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::PinSynced => {
                if let Some(sync) = event
                    .detail
                    .clone()
                    .and_then(|d| serde_json::from_value::<SyncResult>(d).ok())
                {
                    self.syncs.push(sync);
                }
            }
            EventType::TargetStarted => {
                if let Some(ref target) = event.target {
                    let record = self.record_mut(target);
                    record.status = BuildStatus::Running;
                    record.started_at = Some(event.timestamp);
                }
            }
            EventType::TargetSkipped | EventType::TargetSucceeded | EventType::TargetFailed => {
                if let Some(ref target) = event.target {
                    let status = event.status.unwrap_or(match event.event_type {
                        EventType::TargetSkipped => BuildStatus::Skipped,
                        EventType::TargetSucceeded => BuildStatus::Succeeded,
                        _ => BuildStatus::Failed,
                    });
                    let record = self.record_mut(target);
                    record.status = status;
                    record.started_at.get_or_insert(event.timestamp);
                    record.ended_at = Some(event.timestamp);
                }
            }
            EventType::ArtifactPackaged => {
                if let Some(artifact) = event
                    .detail
                    .clone()
                    .and_then(|d| serde_json::from_value::<Artifact>(d).ok())
                {
                    self.artifacts.push(artifact);
                }
            }
            EventType::TargetCleaned | EventType::PatchApplied => {}
        }
    }

    fn record_mut(&mut self, target: &str) -> &mut BuildRecord {
        let idx = match self.records.iter().position(|r| r.target_name == target) {
            Some(idx) => idx,
            None => {
                self.records.push(BuildRecord::pending(target));
                self.records.len() - 1
            }
        };
        &mut self.records[idx]
    }

    /// Record for a target, if the run reached it
    pub fn record(&self, target: &str) -> Option<&BuildRecord> {
        self.records.iter().find(|r| r.target_name == target)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state, RunState::Completed)
    }
}

/// State of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing (or interrupted before finishing)
    Running,

    /// Every selected target succeeded or was skipped
    Completed,

    /// Halted on the first failure
    Failed {
        target: Option<String>,
        error: String,
    },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}
