//! Append-only event store with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL), one file per run:
//! `<runs_dir>/<run-id>/events.jsonl`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{BuildRun, Event, EventType};

/// File-based event store using JSONL format
pub struct EventStore {
    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,
}

impl EventStore {
    /// Create or open the event store for a run below `runs_dir`
    pub async fn open(runs_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = runs_dir.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let events_path = run_dir.join("events.jsonl");

        Ok(Self {
            run_dir,
            events_path,
        })
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Get the run directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open events file: {}",
                    self.events_path.display()
                )
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Rebuild the run from its log
    pub async fn load_run(&self) -> Result<Option<BuildRun>> {
        Ok(BuildRun::from_events(&self.replay().await?))
    }

    /// Find events matching a predicate
    pub async fn find_events<F>(&self, predicate: F) -> Result<Vec<Event>>
    where
        F: Fn(&Event) -> bool,
    {
        let events = self.replay().await?;
        Ok(events.into_iter().filter(predicate).collect())
    }

    /// Get the last event of a specific type
    pub async fn last_event_of_type(&self, event_type: EventType) -> Result<Option<Event>> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().find(|e| e.event_type == event_type))
    }

    /// List all run IDs below `runs_dir`, oldest first
    pub async fn list_runs(runs_dir: &Path) -> Result<Vec<Uuid>> {
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(runs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        let modified = entry.metadata().await?.modified().ok();
                        runs.push((modified, uuid));
                    }
                }
            }
        }

        runs.sort();
        Ok(runs.into_iter().map(|(_, id)| id).collect())
    }

    /// Resolve a run id or unique prefix of one
    pub async fn find_run(runs_dir: &Path, prefix: &str) -> Result<Uuid> {
        let matches: Vec<Uuid> = Self::list_runs(runs_dir)
            .await?
            .into_iter()
            .filter(|id| id.to_string().starts_with(prefix))
            .collect();

        match matches.as_slice() {
            [id] => Ok(*id),
            [] => anyhow::bail!("No run matches '{}'", prefix),
            _ => anyhow::bail!("'{}' matches {} runs; use more characters", prefix, matches.len()),
        }
    }
}

/// Event store bound to one run
pub struct RunLog {
    store: EventStore,
    run_id: Uuid,
}

impl RunLog {
    pub async fn open(runs_dir: &Path, run_id: Uuid) -> Result<Self> {
        Ok(Self {
            store: EventStore::open(runs_dir, run_id).await?,
            run_id,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// New event for this run
    pub fn event(
        &self,
        target: Option<&str>,
        event_type: EventType,
        summary: impl Into<String>,
    ) -> Event {
        Event::new(self.run_id, target.map(str::to_string), event_type, summary)
    }

    pub async fn emit(&self, event: Event) -> Result<()> {
        self.store.append(&event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BuildStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_event_append_and_replay() {
        let temp = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let store = EventStore::open(temp.path(), run_id).await.unwrap();

        store
            .append(&Event::new(run_id, None, EventType::RunStarted, "Run started"))
            .await
            .unwrap();
        store
            .append(
                &Event::new(
                    run_id,
                    Some("ceres".to_string()),
                    EventType::TargetStarted,
                    "Building ceres",
                )
                .with_status(BuildStatus::Running),
            )
            .await
            .unwrap();

        let events = store.replay().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::RunStarted);
        assert_eq!(events[1].event_type, EventType::TargetStarted);
        assert_eq!(
            store.events_path(),
            temp.path().join(run_id.to_string()).join("events.jsonl")
        );
    }

    #[tokio::test]
    async fn test_event_replay_order() {
        let temp = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let store = EventStore::open(temp.path(), run_id).await.unwrap();

        for i in 0..5 {
            let event = Event::new(
                run_id,
                Some(format!("target{}", i)),
                EventType::TargetSkipped,
                format!("Target {} skipped", i),
            );
            store.append(&event).await.unwrap();
        }

        let events = store.replay().await.unwrap();
        assert_eq!(events.len(), 5);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.target, Some(format!("target{}", i)));
        }

        let last = store
            .last_event_of_type(EventType::TargetSkipped)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.target.as_deref(), Some("target4"));
    }

    #[tokio::test]
    async fn test_list_and_find_runs() {
        let temp = TempDir::new().unwrap();
        assert!(EventStore::list_runs(&temp.path().join("missing"))
            .await
            .unwrap()
            .is_empty());

        let run_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        EventStore::open(temp.path(), run_id).await.unwrap();
        std::fs::create_dir_all(temp.path().join("not-a-run")).unwrap();

        assert_eq!(EventStore::list_runs(temp.path()).await.unwrap(), vec![run_id]);
        assert_eq!(
            EventStore::find_run(temp.path(), "550e84").await.unwrap(),
            run_id
        );
        assert!(EventStore::find_run(temp.path(), "ffff").await.is_err());
    }
}
