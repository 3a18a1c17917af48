//! Build graph execution.
//!
//! Targets run strictly in topological order. An existing install marker
//! means "already built" and the target is skipped; the marker is written
//! only after the build command succeeded, so an interrupted build is
//! retried on the next run. The first failure halts the run: later
//! targets never get a record.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::event_store::RunLog;
use super::graph::topological_order;
use super::packaging::Packager;
use super::patch::apply_patches;
use crate::adapters::{BuildContext, BuildRunner};
use crate::config::BuildType;
use crate::domain::{Artifact, BuildRecord, BuildStatus, EventType, Target};
use crate::error::ForgeError;

/// Contents of an install marker; only its existence is consulted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallMarker {
    pub target: String,
    pub built_at: DateTime<Utc>,
    pub build_type: BuildType,
    pub cuda: bool,
    pub run_id: uuid::Uuid,
}

/// Per-run switches for the executor
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Targets whose marker and build cache are deleted before building
    pub force_clean: BTreeSet<String>,
    /// Package each target after it succeeds
    pub package: bool,
}

/// What happened during one execution
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// One record per visited target, in execution order
    pub records: Vec<BuildRecord>,
    pub artifacts: Vec<Artifact>,
    /// Target being processed when the run halted, and why
    pub failure: Option<(String, ForgeError)>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn record(&self, target: &str) -> Option<&BuildRecord> {
        self.records.iter().find(|r| r.target_name == target)
    }
}

/// Drives builds in dependency order
pub struct Executor {
    runner: Arc<dyn BuildRunner>,
    packager: Option<Arc<Packager>>,
    /// Run-wide context; prefix paths are filled in per target
    base: BuildContext,
}

impl Executor {
    pub fn new(runner: Arc<dyn BuildRunner>, base: BuildContext) -> Self {
        Self {
            runner,
            packager: None,
            base,
        }
    }

    pub fn with_packager(mut self, packager: Arc<Packager>) -> Self {
        self.packager = Some(packager);
        self
    }

    /// Build `targets` in dependency order
    ///
    /// Fails before running anything when the graph is cyclic. Build and
    /// packaging failures halt the run and are returned in the report.
    pub async fn execute(
        &self,
        targets: &[Target],
        opts: &ExecuteOptions,
        log: &RunLog,
    ) -> Result<ExecutionReport, ForgeError> {
        let order = topological_order(targets)?;
        let mut report = ExecutionReport::default();

        for target in order {
            let mut record = BuildRecord::pending(&target.name);

            if opts.force_clean.contains(&target.name) {
                clean_target(target)?;
                log.emit(log.event(
                    Some(target.name.as_str()),
                    EventType::TargetCleaned,
                    format!("Removed marker and build cache of {}", target.name),
                ))
                .await?;
            } else if target.has_marker() {
                info!(target = %target.name, "install marker present, skipping");
                record.finish(BuildStatus::Skipped);
                log.emit(
                    log.event(Some(target.name.as_str()), EventType::TargetSkipped, "Install marker present")
                        .with_status(BuildStatus::Skipped),
                )
                .await?;
                report.records.push(record);
                continue;
            }

            record.start();
            log.emit(
                log.event(
                    Some(target.name.as_str()),
                    EventType::TargetStarted,
                    format!("Building {}", target.name),
                )
                .with_status(BuildStatus::Running),
            )
            .await?;

            let prerequisites = prerequisite_installs(target, targets);

            if let Err(e) = self.build_target(target, &prerequisites, log).await {
                error!(target = %target.name, "{}", e);
                record.finish(BuildStatus::Failed);
                let mut event = log
                    .event(Some(target.name.as_str()), EventType::TargetFailed, format!("{} failed", target.name))
                    .with_status(BuildStatus::Failed)
                    .with_error(e.to_string());
                if let Some(ms) = record.duration_ms() {
                    event = event.with_duration(ms);
                }
                log.emit(event).await?;
                report.records.push(record);
                report.failure = Some((target.name.clone(), e));
                return Ok(report);
            }

            record.finish(BuildStatus::Succeeded);
            let mut event = log
                .event(
                    Some(target.name.as_str()),
                    EventType::TargetSucceeded,
                    format!("Built {}", target.name),
                )
                .with_status(BuildStatus::Succeeded);
            if let Some(ms) = record.duration_ms() {
                event = event.with_duration(ms);
            }
            log.emit(event).await?;
            report.records.push(record);

            if opts.package {
                if let Some(ref packager) = self.packager {
                    match packager.package(target, &prerequisites).await {
                        Ok(artifact) => {
                            log.emit(
                                log.event(
                                    Some(target.name.as_str()),
                                    EventType::ArtifactPackaged,
                                    format!(
                                        "Packaged {} ({} libraries bundled)",
                                        target.name,
                                        artifact.bundled_libraries.len()
                                    ),
                                )
                                .with_detail(&artifact),
                            )
                            .await?;
                            report.artifacts.push(artifact);
                        }
                        Err(e) => {
                            error!(target = %target.name, "{}", e);
                            report.failure = Some((target.name.clone(), e));
                            return Ok(report);
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Patches, build command, then the marker as the very last step
    async fn build_target(
        &self,
        target: &Target,
        prerequisites: &[PathBuf],
        log: &RunLog,
    ) -> Result<(), ForgeError> {
        for (id, outcome) in apply_patches(target)? {
            log.emit(log.event(
                Some(target.name.as_str()),
                EventType::PatchApplied,
                format!("Patch {}: {}", id, outcome.as_str()),
            ))
            .await?;
        }

        let ctx = self.context_for(prerequisites);
        self.runner.build(target, &ctx).await?;

        write_marker(target, &InstallMarker {
            target: target.name.clone(),
            built_at: Utc::now(),
            build_type: ctx.build_type,
            cuda: ctx.cuda && target.accelerated,
            run_id: log.run_id(),
        })
    }

    fn context_for(&self, prerequisites: &[PathBuf]) -> BuildContext {
        let mut ctx = self.base.clone();
        ctx.prefix_path = prerequisites.to_vec();
        if !ctx.cuda {
            ctx.cuda_root = None;
        }
        ctx
    }
}

/// Install prefixes of every transitive prerequisite, nearest first
pub fn prerequisite_installs(target: &Target, targets: &[Target]) -> Vec<PathBuf> {
    let by_name: HashMap<&str, &Target> = targets.iter().map(|t| (t.name.as_str(), t)).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = target.prerequisites.iter().map(String::as_str).collect();
    let mut out = Vec::new();

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name) {
            continue;
        }
        if let Some(prereq) = by_name.get(name) {
            out.push(prereq.install_path.clone());
            queue.extend(prereq.prerequisites.iter().map(String::as_str));
        }
    }

    out
}

/// Delete the install marker and the build cache
pub fn clean_target(target: &Target) -> Result<(), ForgeError> {
    remove_marker(target)?;
    if target.build_path.exists() {
        info!(target = %target.name, dir = %target.build_path.display(), "removing build cache");
        std::fs::remove_dir_all(&target.build_path)?;
    }
    Ok(())
}

/// Delete the install marker only, keeping the build cache for an incremental rebuild
pub fn remove_marker(target: &Target) -> Result<bool, ForgeError> {
    match std::fs::remove_file(&target.install_marker_path) {
        Ok(()) => {
            info!(target = %target.name, "install marker removed");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn write_marker(target: &Target, marker: &InstallMarker) -> Result<(), ForgeError> {
    let path = &target.install_marker_path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(marker)
        .map_err(|e| ForgeError::Tool(anyhow::anyhow!("Failed to serialize marker: {}", e)))?;

    // A marker is either complete or absent, never half written
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
