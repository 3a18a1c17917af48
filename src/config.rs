//! Configuration for sfmforge.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (build section only, applied by the CLI)
//! 2. Environment variables (SFMFORGE_HOME, CUDA_PATH, CUDSS_ROOT, VCPKG_ROOT, GITHUB_TOKEN)
//! 3. Config file (.sfmforge/config.yaml)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches the start directory and its parents for .sfmforge/config.yaml
//! - The directory containing .sfmforge/ is the workspace root
//!
//! Environment variables are read exactly once, here. Everything downstream
//! receives the resolved values through [`ResolvedConfig`].

pub mod paths;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub toolchains: ToolchainsConfig,
    #[serde(default)]
    pub release: Option<ReleaseConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .sfmforge/)
    pub home: Option<String>,
    /// Target manifest (relative to the workspace root)
    pub manifest: Option<String>,
    /// Output directory for release archives (relative to the workspace root)
    pub dist: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildConfig {
    pub config: Option<BuildType>,
    pub jobs: Option<usize>,
    pub generator: Option<String>,
    pub cuda: Option<bool>,
    pub gui: Option<bool>,
    pub python: Option<String>,
    /// Extra environment handed to every build invocation
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolchainsConfig {
    #[serde(default)]
    pub cuda_roots: Vec<String>,
    #[serde(default)]
    pub cudss_roots: Vec<String>,
    #[serde(default)]
    pub vcpkg_roots: Vec<String>,
    pub vcpkg_triplet: Option<String>,
    pub inspector: Option<InspectorKind>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseConfig {
    /// owner/name on the release host
    pub repository: String,
    pub api_url: Option<String>,
}

/// CMake build configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum BuildType {
    Debug,
    Release,
}

impl Default for BuildType {
    fn default() -> Self {
        Self::Release
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "Debug"),
            Self::Release => write!(f, "Release"),
        }
    }
}

/// Tool used to list a binary's shared-library imports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectorKind {
    Objdump,
    Dumpbin,
}

impl Default for InspectorKind {
    fn default() -> Self {
        if cfg!(windows) {
            Self::Dumpbin
        } else {
            Self::Objdump
        }
    }
}

/// Build settings after merging file, environment and defaults
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub build_type: BuildType,
    pub jobs: usize,
    pub generator: Option<String>,
    pub cuda: bool,
    pub gui: bool,
    pub python: String,
    pub env: BTreeMap<String, String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            build_type: BuildType::Release,
            jobs: default_jobs(),
            generator: Some("Ninja".to_string()),
            cuda: false,
            gui: false,
            python: default_python().to_string(),
            env: BTreeMap::new(),
        }
    }
}

/// Ordered candidate locations for external toolchains
#[derive(Debug, Clone)]
pub struct ToolchainSettings {
    pub cuda_candidates: Vec<PathBuf>,
    pub cudss_candidates: Vec<PathBuf>,
    pub vcpkg_candidates: Vec<PathBuf>,
    pub vcpkg_triplet: String,
    pub inspector: InspectorKind,
}

#[derive(Debug, Clone)]
pub struct ReleaseSettings {
    pub repository: Option<String>,
    pub api_url: String,
    pub token: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Workspace root (submodules, build/ and install/ live below it)
    pub workspace: PathBuf,
    /// Engine state directory (runs, lock file)
    pub home: PathBuf,
    /// User manifest, if one is configured
    pub manifest: Option<PathBuf>,
    /// Release archive directory
    pub dist: PathBuf,
    pub build: BuildSettings,
    pub toolchains: ToolchainSettings,
    pub release: ReleaseSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Environment values consulted during resolution
///
/// Captured once so that resolution itself is a pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    pub home: Option<String>,
    pub cuda_path: Option<String>,
    pub cudss_root: Option<String>,
    pub vcpkg_root: Option<String>,
    pub github_token: Option<String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            home: var("SFMFORGE_HOME"),
            cuda_path: var("CUDA_PATH"),
            cudss_root: var("CUDSS_ROOT"),
            vcpkg_root: var("VCPKG_ROOT"),
            github_token: var("GITHUB_TOKEN").or_else(|| var("GH_TOKEN")),
        }
    }
}

impl ResolvedConfig {
    /// Runs directory (<home>/runs)
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    /// Lock file guarding against concurrent runs
    pub fn lock_path(&self) -> PathBuf {
        self.home.join("sfmforge.lock")
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_python() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

/// Find config file by searching the start directory and parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".sfmforge").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Load configuration starting the config search at `start`
pub fn load_config(start: &Path) -> Result<ResolvedConfig> {
    resolve_config(start, find_config_file(start), &EnvSnapshot::capture())
}

/// Resolve configuration from an optional config file and an environment snapshot
pub fn resolve_config(
    start: &Path,
    config_file: Option<PathBuf>,
    env: &EnvSnapshot,
) -> Result<ResolvedConfig> {
    let file = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    // Workspace root is the parent of .sfmforge/
    let workspace = config_file
        .as_ref()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| start.to_path_buf());
    let forge_dir = workspace.join(".sfmforge");

    let paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();
    let build_cfg = file.as_ref().map(|f| f.build.clone()).unwrap_or_default();
    let tool_cfg = file
        .as_ref()
        .map(|f| f.toolchains.clone())
        .unwrap_or_default();
    let release_cfg = file.as_ref().and_then(|f| f.release.clone());

    let home = if let Some(ref env_home) = env.home {
        PathBuf::from(env_home)
    } else if let Some(ref home) = paths.home {
        resolve_path(&forge_dir, home)
    } else {
        forge_dir.clone()
    };

    let manifest = paths.manifest.as_deref().map(|m| resolve_path(&workspace, m));
    let dist = paths
        .dist
        .as_deref()
        .map(|d| resolve_path(&workspace, d))
        .unwrap_or_else(|| workspace.join("dist"));

    let defaults = BuildSettings::default();
    let build = BuildSettings {
        build_type: build_cfg.config.unwrap_or(defaults.build_type),
        jobs: build_cfg.jobs.filter(|j| *j > 0).unwrap_or(defaults.jobs),
        generator: build_cfg.generator.or(defaults.generator),
        cuda: build_cfg.cuda.unwrap_or(defaults.cuda),
        gui: build_cfg.gui.unwrap_or(defaults.gui),
        python: build_cfg.python.unwrap_or(defaults.python),
        env: build_cfg.env,
    };

    let toolchains = ToolchainSettings {
        cuda_candidates: candidates(
            env.cuda_path.as_deref(),
            &tool_cfg.cuda_roots,
            &workspace,
            paths::default_cuda_roots(),
        ),
        cudss_candidates: candidates(
            env.cudss_root.as_deref(),
            &tool_cfg.cudss_roots,
            &workspace,
            paths::default_cudss_roots(),
        ),
        vcpkg_candidates: candidates(
            env.vcpkg_root.as_deref(),
            &tool_cfg.vcpkg_roots,
            &workspace,
            paths::default_vcpkg_roots(&workspace),
        ),
        vcpkg_triplet: tool_cfg
            .vcpkg_triplet
            .unwrap_or_else(|| paths::default_vcpkg_triplet().to_string()),
        inspector: tool_cfg.inspector.unwrap_or_default(),
    };

    let release = ReleaseSettings {
        repository: release_cfg.as_ref().map(|r| r.repository.clone()),
        api_url: release_cfg
            .and_then(|r| r.api_url)
            .unwrap_or_else(|| paths::GITHUB_API_URL.to_string()),
        token: env.github_token.clone(),
    };

    Ok(ResolvedConfig {
        workspace,
        home,
        manifest,
        dist,
        build,
        toolchains,
        release,
        config_file,
    })
}

/// Candidate order: environment override, config file entries, conventional locations
fn candidates(
    env_value: Option<&str>,
    configured: &[String],
    workspace: &Path,
    defaults: Vec<PathBuf>,
) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    let explicit = env_value
        .map(PathBuf::from)
        .into_iter()
        .chain(configured.iter().map(|c| resolve_path(workspace, c)));

    for path in explicit.chain(defaults) {
        if !out.contains(&path) {
            out.push(path);
        }
    }

    out
}
