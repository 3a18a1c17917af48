//! Main orchestrator for build runs.
//!
//! One run: take the lock, select targets, synchronize pins, execute the
//! graph (packaging each target as it succeeds), optionally archive, and
//! record every step in the run's event log.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::event_store::RunLog;
use super::executor::{prerequisite_installs, remove_marker, ExecuteOptions, ExecutionReport, Executor};
use super::graph::topological_order;
use super::lock::RunLock;
use super::manifest::Manifest;
use super::packaging::{Packager, PackagingSettings};
use super::patch::{apply_patches, PatchOutcome};
use super::pin_resolver::PinResolver;
use super::search::first_existing_dir;
use crate::adapters::{
    run_tool, AuditwheelRepairer, BuildContext, BuildRunner, CMakeRunner, DelvewheelRepairer,
    DependencyInspector, DumpbinInspector, GitAdapter, ObjdumpInspector, ToolCommand, Vcs,
    WheelRepairer,
};
use crate::config::paths::{
    cuda_runtime_dir, runtime_lib_dir, vcpkg_bootstrap_script, vcpkg_executable,
    vcpkg_toolchain_file,
};
use crate::config::{BuildSettings, InspectorKind, ResolvedConfig};
use crate::domain::{Artifact, BuildStatus, EventType, SyncResult, Target};
use crate::error::ForgeError;

/// External tools the orchestrator drives
#[derive(Clone)]
pub struct Adapters {
    pub vcs: Arc<dyn Vcs>,
    pub runner: Arc<dyn BuildRunner>,
    pub inspector: Arc<dyn DependencyInspector>,
    pub repairer: Option<Arc<dyn WheelRepairer>>,
}

impl Adapters {
    /// The real tools for this platform and configuration
    pub fn system(config: &ResolvedConfig) -> Self {
        let inspector: Arc<dyn DependencyInspector> = match config.toolchains.inspector {
            InspectorKind::Objdump => Arc::new(ObjdumpInspector::new()),
            InspectorKind::Dumpbin => Arc::new(DumpbinInspector::new()),
        };
        let repairer: Option<Arc<dyn WheelRepairer>> = if cfg!(windows) {
            Some(Arc::new(DelvewheelRepairer::new()))
        } else if cfg!(target_os = "linux") {
            Some(Arc::new(AuditwheelRepairer::new()))
        } else {
            None
        };

        Self {
            vcs: Arc::new(GitAdapter::new()),
            runner: Arc::new(CMakeRunner::new()),
            inspector,
            repairer,
        }
    }
}

/// Parameters of a build run
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Requested targets; empty means all
    pub targets: Vec<String>,
    /// Build settings after command-line overrides
    pub build: BuildSettings,
    /// Clean every selected target
    pub clean_all: bool,
    /// Clean these targets
    pub clean: Vec<String>,
    pub skip_pins: bool,
    pub package: bool,
    /// Write a distribution archive for each packaged target
    pub archive: bool,
}

/// Result of a build run
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub syncs: Vec<SyncResult>,
    pub report: ExecutionReport,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }
}

/// One line of `plan` output
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub name: String,
    pub built: bool,
    pub prerequisites: Vec<String>,
    pub install_path: PathBuf,
}

/// Toolchain locations resolved for a run
#[derive(Debug, Clone, Default)]
pub struct Toolchains {
    pub vcpkg_root: Option<PathBuf>,
    pub cuda_root: Option<PathBuf>,
    pub cudss_root: Option<PathBuf>,
}

/// Main build orchestrator
pub struct Orchestrator {
    config: ResolvedConfig,
    manifest: Manifest,
    adapters: Adapters,
}

impl Orchestrator {
    pub fn new(config: ResolvedConfig, manifest: Manifest, adapters: Adapters) -> Self {
        Self {
            config,
            manifest,
            adapters,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Locate vcpkg, CUDA and cuDSS from the configured candidates
    pub fn toolchains(&self, cuda: bool) -> Toolchains {
        let tc = &self.config.toolchains;
        let vcpkg_root = tc
            .vcpkg_candidates
            .iter()
            .find(|root| vcpkg_toolchain_file(root).is_file())
            .cloned();
        if vcpkg_root.is_none() {
            warn!("no vcpkg checkout found; building without a vcpkg toolchain file");
        }

        let (cuda_root, cudss_root) = if cuda {
            let cuda_root = first_existing_dir("CUDA toolkit", &tc.cuda_candidates);
            if cuda_root.is_none() {
                warn!("CUDA requested but no toolkit found; relying on CMake's own discovery");
            }
            (cuda_root, first_existing_dir("cuDSS", &tc.cudss_candidates))
        } else {
            (None, None)
        };

        Toolchains {
            vcpkg_root,
            cuda_root,
            cudss_root,
        }
    }

    /// Run-wide build context
    pub fn build_context(&self, settings: &BuildSettings, tc: &Toolchains) -> BuildContext {
        let mut env = settings.env.clone();
        if tc.vcpkg_root.is_some() {
            env.entry("VCPKG_DEFAULT_TRIPLET".to_string())
                .or_insert_with(|| self.config.toolchains.vcpkg_triplet.clone());
        }

        BuildContext {
            build_type: settings.build_type,
            jobs: settings.jobs,
            generator: settings.generator.clone(),
            cuda: settings.cuda,
            gui: settings.gui,
            python: settings.python.clone(),
            toolchain_file: tc.vcpkg_root.as_deref().map(vcpkg_toolchain_file),
            cuda_root: tc.cuda_root.clone(),
            prefix_path: Vec::new(),
            install_roots: self
                .manifest
                .targets()
                .iter()
                .map(|t| (t.name.clone(), t.install_path.clone()))
                .collect(),
            env,
        }
    }

    pub fn packager(&self, settings: &BuildSettings, tc: &Toolchains) -> Packager {
        let triplet = &self.config.toolchains.vcpkg_triplet;
        Packager::new(
            self.adapters.inspector.clone(),
            self.adapters.repairer.clone(),
            PackagingSettings {
                build_type: settings.build_type,
                cuda: settings.cuda,
                vcpkg_lib_dir: tc
                    .vcpkg_root
                    .as_ref()
                    .map(|root| runtime_lib_dir(&root.join("installed").join(triplet))),
                cuda_runtime_dir: tc.cuda_root.as_deref().map(cuda_runtime_dir),
                cudss_lib_dir: tc.cudss_root.as_deref().map(runtime_lib_dir),
                dist_dir: self.config.dist.clone(),
            },
        )
    }

    /// Full run: pins, builds, packaging
    #[instrument(skip_all)]
    pub async fn run(&self, req: &BuildRequest) -> Result<RunOutcome, ForgeError> {
        let _lock = RunLock::acquire(&self.config.lock_path())?;

        let selected = self.manifest.select(&req.targets)?;
        // A cyclic graph must fail before any checkout moves
        topological_order(&selected)?;

        let run_id = Uuid::new_v4();
        let log = RunLog::open(&self.config.runs_dir(), run_id).await?;
        info!(%run_id, targets = selected.len(), "starting run");

        let names: Vec<&str> = selected.iter().map(|t| t.name.as_str()).collect();
        log.emit(
            log.event(None, EventType::RunStarted, format!("Run started: {}", names.join(", ")))
                .with_detail(&names),
        )
        .await?;

        let syncs = if req.skip_pins {
            Vec::new()
        } else {
            match self.sync_pins_logged(&selected, &log).await {
                Ok(syncs) => syncs,
                Err(e) => {
                    self.fail_run(&log, None, &e).await?;
                    return Err(e);
                }
            }
        };

        let tc = self.toolchains(req.build.cuda);
        let mut executor = Executor::new(
            self.adapters.runner.clone(),
            self.build_context(&req.build, &tc),
        );
        let packager = Arc::new(self.packager(&req.build, &tc));
        if req.package {
            executor = executor.with_packager(packager.clone());
        }

        let force_clean: BTreeSet<String> = if req.clean_all {
            selected.iter().map(|t| t.name.clone()).collect()
        } else {
            for name in &req.clean {
                self.manifest.get(name)?;
            }
            req.clean.iter().cloned().collect()
        };
        let opts = ExecuteOptions {
            force_clean,
            package: req.package,
        };

        let mut report = match executor.execute(&selected, &opts, &log).await {
            Ok(report) => report,
            Err(e) => {
                self.fail_run(&log, None, &e).await?;
                return Err(e);
            }
        };

        if req.archive && report.is_success() {
            for artifact in report.artifacts.iter_mut() {
                if let Err(e) = packager.archive(artifact).await {
                    report.failure = Some((artifact.target_name.clone(), e));
                    break;
                }
            }
        }

        match report.failure {
            Some((ref target, ref e)) => self.fail_run(&log, Some(target.as_str()), e).await?,
            None => {
                let built = report
                    .records
                    .iter()
                    .filter(|r| r.status == BuildStatus::Succeeded)
                    .count();
                log.emit(log.event(
                    None,
                    EventType::RunCompleted,
                    format!("Run completed: {} built, {} skipped", built, report.records.len() - built),
                ))
                .await?;
            }
        }

        Ok(RunOutcome {
            run_id,
            syncs,
            report,
        })
    }

    async fn fail_run(&self, log: &RunLog, target: Option<&str>, e: &ForgeError) -> Result<(), ForgeError> {
        log.emit(
            log.event(target, EventType::RunFailed, "Run failed").with_error(e.to_string()),
        )
        .await?;
        Ok(())
    }

    async fn sync_pins_logged(&self, selected: &[Target], log: &RunLog) -> Result<Vec<SyncResult>, ForgeError> {
        let resolver = PinResolver::new(self.adapters.vcs.clone());
        let syncs = resolver.sync(&self.manifest, selected).await?;

        for sync in &syncs {
            log.emit(
                log.event(
                    Some(sync.upstream_target.as_str()),
                    EventType::PinSynced,
                    if sync.changed {
                        format!(
                            "{} moved {} -> {}",
                            sync.upstream_target,
                            sync.previous_commit.short(),
                            sync.resolved_commit.short()
                        )
                    } else {
                        format!("{} already at {}", sync.upstream_target, sync.resolved_commit.short())
                    },
                )
                .with_detail(sync),
            )
            .await?;
        }

        self.invalidate_moved(selected, &syncs)?;
        Ok(syncs)
    }

    /// Drop markers of moved upstreams and of the targets pinning them
    ///
    /// Build caches stay, so the rebuild is incremental.
    fn invalidate_moved(&self, selected: &[Target], syncs: &[SyncResult]) -> Result<(), ForgeError> {
        for sync in syncs.iter().filter(|s| s.changed) {
            remove_marker(self.manifest.get(&sync.upstream_target)?)?;
            for downstream in selected
                .iter()
                .filter(|t| t.pins.iter().any(|p| p.upstream == sync.upstream_target))
            {
                remove_marker(downstream)?;
            }
        }
        Ok(())
    }

    /// Pin synchronization only
    pub async fn sync(&self, targets: &[String]) -> Result<Vec<SyncResult>, ForgeError> {
        let _lock = RunLock::acquire(&self.config.lock_path())?;
        let selected = self.manifest.select(targets)?;
        let resolver = PinResolver::new(self.adapters.vcs.clone());
        let syncs = resolver.sync(&self.manifest, &selected).await?;
        self.invalidate_moved(&selected, &syncs)?;
        Ok(syncs)
    }

    /// Execution order with marker state, without building anything
    pub fn plan(&self, targets: &[String]) -> Result<Vec<PlanEntry>, ForgeError> {
        let selected = self.manifest.select(targets)?;
        Ok(topological_order(&selected)?
            .into_iter()
            .map(|t| PlanEntry {
                name: t.name.clone(),
                built: t.has_marker(),
                prerequisites: t.prerequisites.clone(),
                install_path: t.install_path.clone(),
            })
            .collect())
    }

    /// Package an already-installed target
    pub async fn package(
        &self,
        name: &str,
        settings: &BuildSettings,
        archive: bool,
    ) -> Result<Artifact, ForgeError> {
        let target = self.manifest.get(name)?;
        let tc = self.toolchains(settings.cuda);
        let packager = self.packager(settings, &tc);

        let mut artifact = packager
            .package(target, &prerequisite_installs(target, self.manifest.targets()))
            .await?;
        if archive {
            packager.archive(&mut artifact).await?;
        }
        Ok(artifact)
    }

    /// Apply declared patches without building
    pub fn patch(&self, targets: &[String]) -> Result<Vec<(String, String, PatchOutcome)>, ForgeError> {
        let _lock = RunLock::acquire(&self.config.lock_path())?;
        let mut out = Vec::new();
        for target in self.manifest.select(targets)? {
            for (id, outcome) in apply_patches(&target)? {
                out.push((target.name.clone(), id, outcome));
            }
        }
        Ok(out)
    }

    /// Initialize submodules and bootstrap vcpkg if needed
    pub async fn bootstrap(&self) -> Result<(), ForgeError> {
        let _lock = RunLock::acquire(&self.config.lock_path())?;
        let workspace = &self.config.workspace;

        info!(workspace = %workspace.display(), "initializing submodules");
        self.adapters.vcs.init_submodules(workspace).await?;

        let Some(root) = self
            .config
            .toolchains
            .vcpkg_candidates
            .iter()
            .find(|r| vcpkg_bootstrap_script(r).is_file())
        else {
            warn!("no vcpkg checkout found, skipping vcpkg bootstrap");
            return Ok(());
        };

        if vcpkg_executable(root).is_file() {
            info!(root = %root.display(), "vcpkg already bootstrapped");
            return Ok(());
        }

        let script = vcpkg_bootstrap_script(root);
        let cmd = if cfg!(windows) {
            ToolCommand::new("cmd").arg("/C").arg(&script)
        } else {
            ToolCommand::new("sh").arg(&script)
        }
        .arg("-disableMetrics")
        .current_dir(root);

        let output = run_tool(&cmd).await?;
        if !output.success() {
            return Err(ForgeError::BuildCommand {
                target: "vcpkg".to_string(),
                step: "bootstrap".to_string(),
                code: output.code(),
                output: output.combined(),
            });
        }
        info!(root = %root.display(), "vcpkg bootstrapped");
        Ok(())
    }
}
