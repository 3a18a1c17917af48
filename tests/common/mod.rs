//! In-memory fakes for the adapter traits.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use sfmforge::adapters::{BuildContext, BuildRunner, DependencyInspector, Vcs};
use sfmforge::core::Manifest;
use sfmforge::domain::{CommitId, Target};
use sfmforge::error::ForgeError;

pub fn commit(c: char) -> CommitId {
    c.to_string().repeat(40).parse().unwrap()
}

pub fn deadbeef() -> CommitId {
    "deadbeef".repeat(5).parse().unwrap()
}

pub fn manifest(workspace: &Path, yaml: &str) -> Manifest {
    Manifest::from_yaml(yaml, workspace).unwrap()
}

/// Two targets: `a`, and `b` depending on `a`
pub const CHAIN: &str = r#"
targets:
  - name: a
    source: src/a
  - name: b
    source: src/b
    prerequisites: [a]
"#;

/// Git checkout held in memory
pub struct FakeVcs {
    pub head: Mutex<CommitId>,
    /// Commits present locally
    pub local: Mutex<HashSet<CommitId>>,
    /// Commits a fetch would bring in
    pub remote: HashSet<CommitId>,
    /// When false, checkout "succeeds" without moving HEAD
    pub checkout_moves: bool,
    pub fetches: AtomicUsize,
    pub checkouts: AtomicUsize,
}

impl FakeVcs {
    pub fn at(head: CommitId) -> Self {
        let mut local = HashSet::new();
        local.insert(head.clone());
        Self {
            head: Mutex::new(head),
            local: Mutex::new(local),
            remote: HashSet::new(),
            checkout_moves: true,
            fetches: AtomicUsize::new(0),
            checkouts: AtomicUsize::new(0),
        }
    }

    pub fn with_remote(mut self, commit: CommitId) -> Self {
        self.remote.insert(commit);
        self
    }

    pub fn stuck(mut self) -> Self {
        self.checkout_moves = false;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> CommitId {
        self.head.lock().unwrap().clone()
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    fn name(&self) -> &str {
        "fake-git"
    }

    async fn head(&self, _repo: &Path) -> Result<CommitId> {
        Ok(self.current())
    }

    async fn fetch(&self, _repo: &Path, _commit: &CommitId) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.local
            .lock()
            .unwrap()
            .extend(self.remote.iter().cloned());
        Ok(())
    }

    async fn contains(&self, _repo: &Path, commit: &CommitId) -> Result<bool> {
        Ok(self.local.lock().unwrap().contains(commit))
    }

    async fn checkout(&self, _repo: &Path, commit: &CommitId) -> Result<()> {
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        if self.checkout_moves {
            *self.head.lock().unwrap() = commit.clone();
        }
        Ok(())
    }

    async fn init_submodules(&self, _repo: &Path) -> Result<()> {
        Ok(())
    }
}

/// Records build invocations; targets in `failing` exit with status 1
#[derive(Default)]
pub struct FakeRunner {
    pub calls: Mutex<Vec<String>>,
    pub failing: HashSet<String>,
    pub contexts: Mutex<Vec<BuildContext>>,
}

impl FakeRunner {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildRunner for FakeRunner {
    fn name(&self) -> &str {
        "fake-build"
    }

    async fn build(&self, target: &Target, ctx: &BuildContext) -> Result<(), ForgeError> {
        self.calls.lock().unwrap().push(target.name.clone());
        self.contexts.lock().unwrap().push(ctx.clone());

        if self.failing.contains(&target.name) {
            return Err(ForgeError::BuildCommand {
                target: target.name.clone(),
                step: "build".to_string(),
                code: Some(1),
                output: "error: simulated compiler failure".to_string(),
            });
        }
        std::fs::create_dir_all(&target.install_path)?;
        Ok(())
    }
}

/// Dependency table keyed by binary file name
#[derive(Default)]
pub struct FakeInspector {
    pub deps: HashMap<String, Vec<String>>,
    pub unreadable: HashSet<String>,
}

impl FakeInspector {
    pub fn with(mut self, binary: &str, deps: &[&str]) -> Self {
        self.deps.insert(
            binary.to_string(),
            deps.iter().map(|d| d.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl DependencyInspector for FakeInspector {
    fn name(&self) -> &str {
        "fake-inspect"
    }

    async fn dependencies(&self, binary: &Path) -> Result<Vec<String>> {
        let name = binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.unreadable.contains(&name) {
            bail!("{}: file format not recognized", name);
        }
        Ok(self.deps.get(&name).cloned().unwrap_or_default())
    }
}

pub fn write(path: &Path, contents: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
    path.to_path_buf()
}
