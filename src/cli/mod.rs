//! Command-line interface for sfmforge.
//!
//! Provides commands for building the target graph, synchronizing pins,
//! packaging and publishing artifacts, and inspecting past runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::GitHubClient;
use crate::config::{load_config, BuildSettings, BuildType, ResolvedConfig};
use crate::core::event_store::EventStore;
use crate::core::publisher::collect_release_files;
use crate::core::{Adapters, BuildRequest, Manifest, Orchestrator, PublishRequest, Publisher};
use crate::domain::{BuildStatus, RunState};
use crate::error::ForgeError;

/// sfmforge - Build orchestrator for the structure-from-motion stack
#[derive(Parser, Debug)]
#[command(name = "sfmforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Target manifest overlaying the built-in one
    #[arg(long, global = true, env = "SFMFORGE_MANIFEST")]
    pub manifest: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags overriding the build section of the config file
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BuildFlags {
    /// Build configuration
    #[arg(long = "config", value_enum, ignore_case = true)]
    pub build_type: Option<BuildType>,

    /// Enable CUDA for accelerated targets
    #[arg(long, conflicts_with = "no_cuda")]
    pub cuda: bool,

    /// Disable CUDA
    #[arg(long)]
    pub no_cuda: bool,

    /// Build GUI components
    #[arg(long)]
    pub gui: bool,

    /// Parallel build jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

impl BuildFlags {
    /// Apply the flags on top of the configured settings
    pub fn apply(&self, mut settings: BuildSettings) -> BuildSettings {
        if let Some(build_type) = self.build_type {
            settings.build_type = build_type;
        }
        if self.cuda {
            settings.cuda = true;
        }
        if self.no_cuda {
            settings.cuda = false;
        }
        if self.gui {
            settings.gui = true;
        }
        if let Some(jobs) = self.jobs.filter(|j| *j > 0) {
            settings.jobs = jobs;
        }
        settings
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync pins, then build, install and package the selected targets
    Build {
        /// Targets to build (comma-separated, prerequisites included); all if omitted
        #[arg(short, long, value_delimiter = ',')]
        targets: Vec<String>,

        #[command(flatten)]
        flags: BuildFlags,

        /// Delete markers and build caches of every selected target first
        #[arg(long)]
        clean: bool,

        /// Delete marker and build cache of this target first (repeatable)
        #[arg(long = "clean-target")]
        clean_target: Vec<String>,

        /// Do not touch upstream checkouts
        #[arg(long)]
        skip_pins: bool,

        /// Do not bundle runtime libraries
        #[arg(long)]
        no_package: bool,

        /// Write a distribution archive for each packaged target
        #[arg(long)]
        archive: bool,
    },

    /// Align upstream checkouts with the commits their consumers pin
    Sync {
        #[arg(short, long, value_delimiter = ',')]
        targets: Vec<String>,
    },

    /// Show the build order and which targets are already installed
    Plan {
        #[arg(short, long, value_delimiter = ',')]
        targets: Vec<String>,
    },

    /// Package an already-installed target
    Package {
        target: String,

        #[command(flatten)]
        flags: BuildFlags,

        /// Also write a distribution archive
        #[arg(long)]
        archive: bool,
    },

    /// Publish artifacts as a tagged release
    Publish {
        /// Release tag
        #[arg(long)]
        tag: String,

        /// Release title (defaults to the tag)
        #[arg(long)]
        title: Option<String>,

        /// File with release notes
        #[arg(long)]
        notes_file: Option<PathBuf>,

        /// Replace an existing release with the same tag
        #[arg(long)]
        overwrite: bool,

        /// Publish every file in this directory
        #[arg(long, conflicts_with = "targets")]
        dir: Option<PathBuf>,

        /// Package and archive these targets, then publish the archives
        #[arg(short, long, value_delimiter = ',')]
        targets: Vec<String>,

        #[command(flatten)]
        flags: BuildFlags,
    },

    /// Initialize submodules and bootstrap vcpkg
    Bootstrap,

    /// Apply declared upstream patches without building
    Patch {
        #[arg(short, long, value_delimiter = ',')]
        targets: Vec<String>,
    },

    /// Check the status of a run
    Status {
        /// Run ID (or unique prefix)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = current_config()?;
        let manifest = self.manifest;

        match self.command {
            Commands::Build {
                targets,
                flags,
                clean,
                clean_target,
                skip_pins,
                no_package,
                archive,
            } => {
                let req = BuildRequest {
                    targets,
                    build: flags.apply(config.build.clone()),
                    clean_all: clean,
                    clean: clean_target,
                    skip_pins,
                    package: !no_package,
                    archive: archive && !no_package,
                };
                build(config, manifest, &req).await
            }
            Commands::Sync { targets } => sync(config, manifest, &targets).await,
            Commands::Plan { targets } => plan(config, manifest, &targets),
            Commands::Package {
                target,
                flags,
                archive,
            } => {
                let settings = flags.apply(config.build.clone());
                package(config, manifest, &target, &settings, archive).await
            }
            Commands::Publish {
                tag,
                title,
                notes_file,
                overwrite,
                dir,
                targets,
                flags,
            } => {
                let settings = flags.apply(config.build.clone());
                let notes = match notes_file {
                    Some(path) => std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read notes file: {}", path.display()))?,
                    None => String::new(),
                };
                publish(config, manifest, PublishArgs {
                    tag,
                    title,
                    notes,
                    overwrite,
                    dir,
                    targets,
                    settings,
                })
                .await
            }
            Commands::Bootstrap => {
                orchestrator(config, manifest)?.bootstrap().await?;
                println!("Bootstrap complete");
                Ok(())
            }
            Commands::Patch { targets } => patch(config, manifest, &targets),
            Commands::Status { run_id } => show_status(&config, &run_id).await,
            Commands::Runs { limit } => list_runs(&config, limit).await,
            Commands::Config => show_config(&config),
        }
    }
}

fn current_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    load_config(&cwd)
}

fn orchestrator(config: ResolvedConfig, manifest: Option<PathBuf>) -> Result<Orchestrator> {
    let manifest_path = manifest.or_else(|| config.manifest.clone());
    let manifest = Manifest::load(&config.workspace, manifest_path.as_deref())
        .context("Failed to load target manifest")?;
    let adapters = Adapters::system(&config);
    Ok(Orchestrator::new(config, manifest, adapters))
}

/// Print a run-halting error with the tool's own text and exit nonzero
fn fail(target: Option<&str>, err: &ForgeError) -> ! {
    match target {
        Some(target) => eprintln!("\n[{} failed] {}", target, err),
        None => eprintln!("\n[sfmforge failed] {}", err),
    }
    std::process::exit(1);
}

/// Full build run
async fn build(config: ResolvedConfig, manifest: Option<PathBuf>, req: &BuildRequest) -> Result<()> {
    let orchestrator = orchestrator(config, manifest)?;
    let outcome = match orchestrator.run(req).await {
        Ok(outcome) => outcome,
        Err(e) => fail(None, &e),
    };

    for sync in outcome.syncs.iter().filter(|s| s.changed) {
        println!(
            "pin  {:<20} {} -> {}",
            sync.upstream_target,
            sync.previous_commit.short(),
            sync.resolved_commit.short()
        );
    }
    for record in &outcome.report.records {
        let duration = record
            .duration_ms()
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_default();
        println!("{:<10} {:<20} {}", record.status.as_str(), record.target_name, duration);
    }
    for artifact in &outcome.report.artifacts {
        println!(
            "packaged {} ({} libraries{})",
            artifact.target_name,
            artifact.bundled_libraries.len(),
            artifact
                .archive
                .as_ref()
                .map(|a| format!(", {}", a.display()))
                .unwrap_or_default()
        );
    }

    if let Some((ref target, ref e)) = outcome.report.failure {
        fail(Some(target.as_str()), e);
    }
    eprintln!("\n[Run {} completed successfully]", outcome.run_id);
    Ok(())
}

async fn sync(config: ResolvedConfig, manifest: Option<PathBuf>, targets: &[String]) -> Result<()> {
    let orchestrator = orchestrator(config, manifest)?;
    let syncs = match orchestrator.sync(targets).await {
        Ok(syncs) => syncs,
        Err(e) => fail(None, &e),
    };

    if syncs.is_empty() {
        println!("No pins declared by the selected targets");
    }
    for sync in syncs {
        if sync.changed {
            println!(
                "{:<20} {} -> {}",
                sync.upstream_target,
                sync.previous_commit.short(),
                sync.resolved_commit.short()
            );
        } else {
            println!("{:<20} {} (unchanged)", sync.upstream_target, sync.resolved_commit.short());
        }
    }
    Ok(())
}

fn plan(config: ResolvedConfig, manifest: Option<PathBuf>, targets: &[String]) -> Result<()> {
    let orchestrator = orchestrator(config, manifest)?;
    let entries = match orchestrator.plan(targets) {
        Ok(entries) => entries,
        Err(e) => fail(None, &e),
    };

    println!("{:<4} {:<20} {:<10} {}", "#", "TARGET", "STATE", "PREREQUISITES");
    println!("{}", "-".repeat(60));
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{:<4} {:<20} {:<10} {}",
            i + 1,
            entry.name,
            if entry.built { "installed" } else { "pending" },
            entry.prerequisites.join(", ")
        );
    }
    Ok(())
}

async fn package(
    config: ResolvedConfig,
    manifest: Option<PathBuf>,
    target: &str,
    settings: &BuildSettings,
    archive: bool,
) -> Result<()> {
    let orchestrator = orchestrator(config, manifest)?;
    let artifact = match orchestrator.package(target, settings, archive).await {
        Ok(artifact) => artifact,
        Err(e) => fail(Some(target), &e),
    };

    println!("Packaged {} into {}", artifact.target_name, artifact.install_root.display());
    for lib in &artifact.bundled_libraries {
        println!("  + {}", lib.display());
    }
    for wheel in &artifact.wheels {
        println!("  wheel {}", wheel.display());
    }
    if let Some(ref archive) = artifact.archive {
        println!("  archive {}", archive.display());
    }
    Ok(())
}

struct PublishArgs {
    tag: String,
    title: Option<String>,
    notes: String,
    overwrite: bool,
    dir: Option<PathBuf>,
    targets: Vec<String>,
    settings: BuildSettings,
}

async fn publish(config: ResolvedConfig, manifest: Option<PathBuf>, args: PublishArgs) -> Result<()> {
    let repository = config
        .release
        .repository
        .clone()
        .context("No release repository configured (set release.repository in .sfmforge/config.yaml)")?;
    let client = GitHubClient::new(
        &config.release.api_url,
        &repository,
        config.release.token.clone(),
    );

    let mut req = if !args.targets.is_empty() {
        let orchestrator = orchestrator(config, manifest)?;
        let mut artifacts = Vec::new();
        for target in &args.targets {
            match orchestrator.package(target, &args.settings, true).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => fail(Some(target.as_str()), &e),
            }
        }
        PublishRequest::for_artifacts(&artifacts, args.tag.clone(), args.notes)
    } else {
        let dir = args.dir.unwrap_or_else(|| config.dist.clone());
        let files = release_files(&dir)?;
        PublishRequest {
            title: args.tag.clone(),
            tag: args.tag.clone(),
            notes: args.notes,
            files,
            overwrite: false,
        }
    };
    if let Some(title) = args.title {
        req.title = title;
    }
    req.overwrite = args.overwrite;

    let publisher = Publisher::new(Arc::new(client));
    let result = match publisher.publish(&req).await {
        Ok(result) => result,
        Err(e) => fail(None, &e),
    };

    if result.replaced {
        println!("Replaced existing release {}", req.tag);
    }
    for asset in &result.assets {
        println!("  {} ({} bytes)", asset.name, asset.size);
    }
    println!("Published {}", result.release.html_url);
    Ok(())
}

fn release_files(dir: &Path) -> Result<Vec<PathBuf>> {
    collect_release_files(dir)
        .with_context(|| format!("Failed to list release files in {}", dir.display()))
}

fn patch(config: ResolvedConfig, manifest: Option<PathBuf>, targets: &[String]) -> Result<()> {
    let orchestrator = orchestrator(config, manifest)?;
    let outcomes = match orchestrator.patch(targets) {
        Ok(outcomes) => outcomes,
        Err(e) => fail(None, &e),
    };

    if outcomes.is_empty() {
        println!("No patches declared by the selected targets");
    }
    for (target, id, outcome) in outcomes {
        println!("{:<20} {:<30} {}", target, id, outcome.as_str());
    }
    Ok(())
}

/// Show the status of a run
async fn show_status(config: &ResolvedConfig, run_id: &str) -> Result<()> {
    let runs_dir = config.runs_dir();
    let run_id = EventStore::find_run(&runs_dir, run_id).await?;
    let store = EventStore::open(&runs_dir, run_id).await?;
    let run = store
        .load_run()
        .await?
        .with_context(|| format!("Run {} has no events", run_id))?;

    println!("Run ID: {}", run.id);
    println!("State: {}", state_label(&run.state));
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    if let RunState::Failed {
        ref target,
        ref error,
    } = run.state
    {
        if let Some(target) = target {
            println!("Failed target: {}", target);
        }
        println!("Error: {}", error);
    }

    if !run.syncs.is_empty() {
        println!("\nPins:");
        for sync in &run.syncs {
            println!(
                "  {}: {} -> {}{}",
                sync.upstream_target,
                sync.previous_commit.short(),
                sync.resolved_commit.short(),
                if sync.changed { "" } else { " (unchanged)" }
            );
        }
    }

    println!("\nTargets:");
    for record in &run.records {
        println!("  {}: {}", record.target_name, record.status.as_str());
    }
    let built = run
        .records
        .iter()
        .filter(|r| r.status == BuildStatus::Succeeded)
        .count();
    println!("\n{} built, {} artifacts", built, run.artifacts.len());

    Ok(())
}

fn state_label(state: &RunState) -> &'static str {
    match state {
        RunState::Running => "running",
        RunState::Completed => "completed",
        RunState::Failed { .. } => "failed",
    }
}

/// List recent runs, newest first
async fn list_runs(config: &ResolvedConfig, limit: usize) -> Result<()> {
    let runs_dir = config.runs_dir();
    let ids = EventStore::list_runs(&runs_dir).await?;

    if ids.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<12} {:<26} {}", "RUN ID", "STATE", "STARTED", "TARGETS");
    println!("{}", "-".repeat(90));

    for id in ids.into_iter().rev().take(limit) {
        let store = EventStore::open(&runs_dir, id).await?;
        if let Some(run) = store.load_run().await? {
            println!(
                "{:<38} {:<12} {:<26} {}",
                run.id,
                state_label(&run.state),
                run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
                run.records.len()
            );
        }
    }

    Ok(())
}

/// Show resolved configuration
fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("sfmforge configuration");
    println!("======================\n");

    match config.config_file {
        Some(ref path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none found, using defaults)"),
    }
    println!("Workspace: {}", config.workspace.display());
    println!("Home: {}", config.home.display());
    println!("Runs: {}", config.runs_dir().display());
    println!("Dist: {}", config.dist.display());
    match config.manifest {
        Some(ref path) => println!("Manifest: {}", path.display()),
        None => println!("Manifest: (built-in)"),
    }

    let build = &config.build;
    println!("\nBuild:");
    println!("  config: {}", build.build_type);
    println!("  jobs: {}", build.jobs);
    println!("  generator: {}", build.generator.as_deref().unwrap_or("(cmake default)"));
    println!("  cuda: {}", build.cuda);
    println!("  gui: {}", build.gui);
    println!("  python: {}", build.python);
    for (key, value) in &build.env {
        println!("  env {}={}", key, value);
    }

    let tc = &config.toolchains;
    println!("\nToolchain candidates:");
    print_candidates("cuda", &tc.cuda_candidates);
    print_candidates("cudss", &tc.cudss_candidates);
    print_candidates("vcpkg", &tc.vcpkg_candidates);
    println!("  vcpkg triplet: {}", tc.vcpkg_triplet);
    println!("  inspector: {:?}", tc.inspector);

    println!("\nRelease:");
    println!(
        "  repository: {}",
        config.release.repository.as_deref().unwrap_or("(not set)")
    );
    println!("  api: {}", config.release.api_url);
    println!(
        "  token: {}",
        if config.release.token.is_some() { "set" } else { "not set" }
    );

    Ok(())
}

fn print_candidates(what: &str, candidates: &[PathBuf]) {
    for path in candidates {
        let marker = if path.is_dir() { "*" } else { " " };
        println!("  {} {:<6} {}", marker, what, path.display());
    }
}
