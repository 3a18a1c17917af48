//! First-existing-root resolution.
//!
//! Toolchain discovery and library bundling both walk an ordered list of
//! candidates and take the first hit. Every hit is logged with the root
//! and the candidate index that produced it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Where a bundled library was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibrarySource {
    /// The target's own build or install output
    BuildOutput,
    /// vcpkg installed tree
    PackageManager,
    /// CUDA runtime
    AcceleratorRuntime,
    /// cuDSS
    SparseSolver,
}

impl fmt::Display for LibrarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BuildOutput => "build output",
            Self::PackageManager => "package manager",
            Self::AcceleratorRuntime => "accelerator runtime",
            Self::SparseSolver => "sparse solver",
        };
        f.write_str(s)
    }
}

/// One directory searched for libraries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRoot {
    pub source: LibrarySource,
    pub dir: PathBuf,
}

/// Ordered library search roots; earlier roots win
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRoots {
    roots: Vec<SearchRoot>,
}

impl SearchRoots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a root; missing directories are warned about and skipped
    pub fn push(&mut self, source: LibrarySource, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !dir.is_dir() {
            warn!(root = %dir.display(), source = %source, "search root missing, skipping");
            return;
        }
        if self.roots.iter().any(|r| r.dir == dir) {
            return;
        }
        self.roots.push(SearchRoot { source, dir });
    }

    pub fn roots(&self) -> &[SearchRoot] {
        &self.roots
    }

    pub fn dirs(&self) -> Vec<PathBuf> {
        self.roots.iter().map(|r| r.dir.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// First root containing `file_name`
    pub fn find(&self, file_name: &str) -> Option<(PathBuf, LibrarySource)> {
        let candidates: Vec<PathBuf> = self.roots.iter().map(|r| r.dir.join(file_name)).collect();
        resolve_first_existing(file_name, &candidates)
            .map(|(path, idx)| (path, self.roots[idx].source))
    }
}

/// First candidate that exists, with its index
pub fn resolve_first_existing(what: &str, candidates: &[PathBuf]) -> Option<(PathBuf, usize)> {
    for (idx, candidate) in candidates.iter().enumerate() {
        if candidate.exists() {
            debug!(
                what,
                root = %candidate.parent().unwrap_or(candidate).display(),
                candidate = idx,
                "resolved"
            );
            return Some((candidate.clone(), idx));
        }
    }
    debug!(what, candidates = candidates.len(), "not found in any candidate");
    None
}

/// First existing directory among `candidates`
pub fn first_existing_dir(what: &str, candidates: &[PathBuf]) -> Option<PathBuf> {
    for (idx, candidate) in candidates.iter().enumerate() {
        if candidate.is_dir() {
            debug!(what, root = %candidate.display(), candidate = idx, "resolved");
            return Some(candidate.clone());
        }
    }
    debug!(what, candidates = candidates.len(), "no candidate directory exists");
    None
}

/// Whether `path` is a file name without directories
pub fn is_bare_name(path: &Path) -> bool {
    path.components().count() == 1
}
