//! Adapter interfaces for external tools.
//!
//! Adapters wrap the processes and services the orchestrator drives:
//! git (pins, submodules), CMake (builds), binary inspectors (packaging),
//! wheel repair tools and the release endpoint. The core only talks to the
//! traits below, so tests substitute in-memory fakes.

pub mod cmake;
pub mod git;
pub mod github;
pub mod inspect;
pub mod process;
pub mod wheel;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use crate::config::BuildType;
use crate::domain::{CommitId, Target};
use crate::error::ForgeError;

// Re-export the concrete adapters
pub use cmake::CMakeRunner;
pub use git::GitAdapter;
pub use github::{GitHubClient, Release, ReleaseAsset};
pub use inspect::{DumpbinInspector, ObjdumpInspector};
pub use process::{run_tool, ToolCommand, ToolOutput};
pub use wheel::{AuditwheelRepairer, DelvewheelRepairer};

/// Version control operations on a local checkout
#[async_trait]
pub trait Vcs: Send + Sync {
    fn name(&self) -> &str;

    /// Commit currently checked out
    async fn head(&self, repo: &Path) -> Result<CommitId>;

    /// Fetch from the remote so that `commit` becomes reachable if it exists
    async fn fetch(&self, repo: &Path, commit: &CommitId) -> Result<()>;

    /// Whether `commit` exists locally
    async fn contains(&self, repo: &Path, commit: &CommitId) -> Result<bool>;

    /// Check out `commit`; may exit successfully without moving the tree
    async fn checkout(&self, repo: &Path, commit: &CommitId) -> Result<()>;

    /// Initialize and update all submodules recursively
    async fn init_submodules(&self, repo: &Path) -> Result<()>;
}

/// Everything a build invocation needs, passed explicitly
///
/// Nothing here is read from the ambient process environment at build time.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub build_type: BuildType,
    pub jobs: usize,
    pub generator: Option<String>,
    pub cuda: bool,
    pub gui: bool,
    pub python: String,
    pub toolchain_file: Option<PathBuf>,
    pub cuda_root: Option<PathBuf>,
    /// Install roots of this target's prerequisites, nearest first
    pub prefix_path: Vec<PathBuf>,
    /// Install root of every declared target, for `{install:<name>}`
    pub install_roots: BTreeMap<String, PathBuf>,
    /// Environment additions for the spawned tools
    pub env: BTreeMap<String, String>,
}

/// Runs a target's configure/build/install commands
#[async_trait]
pub trait BuildRunner: Send + Sync {
    fn name(&self) -> &str;

    /// Build and install `target`; nonzero exits become `ForgeError::BuildCommand`
    async fn build(&self, target: &Target, ctx: &BuildContext) -> Result<(), ForgeError>;
}

/// Lists the shared libraries a binary links against directly
#[async_trait]
pub trait DependencyInspector: Send + Sync {
    fn name(&self) -> &str;

    /// File names of direct shared-library dependencies
    async fn dependencies(&self, binary: &Path) -> Result<Vec<String>>;
}

/// Bundles a wheel's shared-library closure into a redistributable wheel
#[async_trait]
pub trait WheelRepairer: Send + Sync {
    fn name(&self) -> &str;

    /// Repair `wheel` using `lib_dirs` and place the result in `out_dir`
    async fn repair(&self, wheel: &Path, lib_dirs: &[PathBuf], out_dir: &Path) -> Result<PathBuf>;
}

/// Remote release endpoint
#[async_trait]
pub trait ReleaseApi: Send + Sync {
    async fn find_release(&self, tag: &str) -> Result<Option<Release>, ForgeError>;

    async fn delete_release(&self, release: &Release) -> Result<(), ForgeError>;

    async fn create_release(
        &self,
        tag: &str,
        title: &str,
        notes: &str,
    ) -> Result<Release, ForgeError>;

    async fn upload_asset(&self, release: &Release, file: &Path)
        -> Result<ReleaseAsset, ForgeError>;
}
