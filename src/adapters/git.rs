//! Git adapter using the `git` command line.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::process::{run_tool, ToolCommand};
use super::Vcs;
use crate::domain::CommitId;

/// Git adapter using subprocess mode
pub struct GitAdapter {
    /// Path to the git binary (default: "git")
    binary_path: String,
}

impl Default for GitAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl GitAdapter {
    pub fn new() -> Self {
        Self::with_binary_path("git")
    }

    /// Create a git adapter with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    fn command(&self, repo: &Path) -> ToolCommand {
        ToolCommand::new(&self.binary_path)
            .arg("-C")
            .arg(repo)
            // Never block on a credential prompt
            .env("GIT_TERMINAL_PROMPT", "0")
    }

    async fn run_checked(&self, cmd: ToolCommand, what: &str) -> Result<String> {
        let output = run_tool(&cmd).await?;
        if !output.success() {
            anyhow::bail!(
                "git {} failed with exit code {}: {}",
                what,
                output.code().unwrap_or(-1),
                output.stderr.trim()
            );
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Vcs for GitAdapter {
    fn name(&self) -> &str {
        "git"
    }

    async fn head(&self, repo: &Path) -> Result<CommitId> {
        let stdout = self
            .run_checked(self.command(repo).args(["rev-parse", "HEAD"]), "rev-parse")
            .await
            .with_context(|| format!("Failed to read HEAD of {}", repo.display()))?;

        stdout
            .trim()
            .parse::<CommitId>()
            .map_err(|e| anyhow::anyhow!("Unexpected rev-parse output in {}: {}", repo.display(), e))
    }

    async fn fetch(&self, repo: &Path, commit: &CommitId) -> Result<()> {
        self.run_checked(
            self.command(repo).args(["fetch", "--quiet", "--tags", "origin"]),
            "fetch",
        )
        .await?;

        // Commits outside any advertised ref need an explicit fetch
        if !self.contains(repo, commit).await? {
            debug!(commit = %commit, "commit not reachable from refs, fetching it directly");
            self.run_checked(
                self.command(repo)
                    .args(["fetch", "--quiet", "origin"])
                    .arg(commit.as_str()),
                "fetch",
            )
            .await?;
        }

        Ok(())
    }

    async fn contains(&self, repo: &Path, commit: &CommitId) -> Result<bool> {
        let output = run_tool(
            &self
                .command(repo)
                .args(["cat-file", "-e"])
                .arg(format!("{}^{{commit}}", commit)),
        )
        .await?;
        Ok(output.success())
    }

    async fn checkout(&self, repo: &Path, commit: &CommitId) -> Result<()> {
        self.run_checked(
            self.command(repo)
                .args(["checkout", "--quiet", "--detach"])
                .arg(commit.as_str()),
            "checkout",
        )
        .await?;
        Ok(())
    }

    async fn init_submodules(&self, repo: &Path) -> Result<()> {
        self.run_checked(
            self.command(repo)
                .args(["submodule", "update", "--init", "--recursive"]),
            "submodule update",
        )
        .await?;
        Ok(())
    }
}
