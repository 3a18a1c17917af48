//! Buildable targets.
//!
//! A Target is declared once in the manifest and never mutated during a run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One buildable unit in the dependency graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Unique target name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Absolute source tree
    pub source_path: PathBuf,

    /// Absolute install prefix
    pub install_path: PathBuf,

    /// Absolute build (cache) directory
    pub build_path: PathBuf,

    /// Names of targets that must be built first
    pub prerequisites: Vec<String>,

    /// How to configure, build and install
    pub build: BuildSpec,

    /// Absolute marker path; existence means "already built"
    pub install_marker_path: PathBuf,

    /// Commit pins this target imposes on upstream targets
    pub pins: Vec<PinSpec>,

    /// Upstream build-file patches applied before building
    pub patches: Vec<PatchSpec>,

    /// Packaging rules
    pub package: PackageSpec,

    /// Whether the accelerator flag applies to this target
    pub accelerated: bool,
}

impl Target {
    pub fn has_marker(&self) -> bool {
        self.install_marker_path.exists()
    }
}

/// Build command template
///
/// Every argument may contain `{placeholder}` references that are expanded
/// per invocation (see `core::template`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildSpec {
    /// CMake configure + build + install with extra configure arguments
    Cmake {
        #[serde(default)]
        args: Vec<String>,
    },

    /// Explicit argv lists executed in order
    Command { steps: Vec<Vec<String>> },
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self::Cmake { args: Vec::new() }
    }
}

/// A commit pin read from the downstream target's build configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinSpec {
    /// Upstream target whose checkout is pinned
    pub upstream: String,

    /// File (relative to the downstream source tree) holding the fetch directive
    pub file: PathBuf,

    /// Name given to the upstream in the fetch directive (e.g. `COLMAP`)
    pub fetch_name: String,
}

/// A versioned textual patch to an upstream build file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSpec {
    /// Stable identifier, bumped whenever the patch changes
    pub id: String,

    /// File relative to the target's source tree
    pub file: PathBuf,

    /// Exact text to replace
    pub pattern: String,

    /// Replacement text
    pub replacement: String,
}

/// Packaging rules for a target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    /// Glob patterns (relative to the install root) naming primary binaries
    #[serde(default)]
    pub binaries: Vec<String>,

    /// Directory (relative to the install root) receiving bundled libraries
    #[serde(default)]
    pub bundle_dir: Option<PathBuf>,

    /// Repair and bundle a Python wheel produced by the build
    #[serde(default)]
    pub wheel: bool,

    /// Directory (relative to the build dir) holding the built wheel
    #[serde(default)]
    pub wheel_dir: Option<PathBuf>,
}
