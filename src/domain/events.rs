//! Event types for the run log.
//!
//! Every state change of a run is recorded as an immutable event in an
//! append-only log, so `status` can reconstruct what happened after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::BuildStatus;

/// A single event in the append-only run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Target concerned (if applicable)
    pub target: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary
    pub summary: String,

    /// Target status after this event
    pub status: Option<BuildStatus>,

    /// Time taken in milliseconds (for finished targets)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,

    /// Structured payload (sync result, artifact, selection)
    pub detail: Option<serde_json::Value>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        target: Option<String>,
        event_type: EventType,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            target,
            event_type,
            summary: summary.into(),
            status: None,
            duration_ms: None,
            error: None,
            detail: None,
        }
    }

    pub fn with_status(mut self, status: BuildStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a serializable payload; serialization failures drop the payload
    pub fn with_detail<T: Serialize>(mut self, detail: &T) -> Self {
        self.detail = serde_json::to_value(detail).ok();
        self
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunCompleted,
    RunFailed,

    /// A pin was checked (detail: SyncResult)
    PinSynced,

    /// A target entered the executor
    TargetStarted,
    TargetSkipped,
    TargetSucceeded,
    TargetFailed,

    /// Marker and/or build cache removed before building
    TargetCleaned,

    /// An upstream patch was applied or found already applied
    PatchApplied,

    /// Packaging finished (detail: Artifact)
    ArtifactPackaged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SyncResult;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            Uuid::new_v4(),
            Some("glomap".to_string()),
            EventType::TargetStarted,
            "Building glomap",
        )
        .with_status(BuildStatus::Running);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"target_started\""));
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::TargetStarted);
        assert_eq!(parsed.status, Some(BuildStatus::Running));
    }

    #[test]
    fn test_event_builders() {
        let sync = SyncResult {
            upstream_target: "colmap-for-glomap".to_string(),
            previous_commit: "a".repeat(40).parse().unwrap(),
            resolved_commit: "b".repeat(40).parse().unwrap(),
            changed: true,
        };

        let event = Event::new(Uuid::new_v4(), None, EventType::PinSynced, "pin moved")
            .with_duration(1500)
            .with_error("boom")
            .with_detail(&sync);

        assert_eq!(event.duration_ms, Some(1500));
        assert_eq!(event.error.as_deref(), Some("boom"));
        let back: SyncResult = serde_json::from_value(event.detail.unwrap()).unwrap();
        assert_eq!(back, sync);
    }
}
