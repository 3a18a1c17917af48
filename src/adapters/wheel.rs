//! Python wheel repair.
//!
//! The repair tools vendor a wheel's shared-library closure into the wheel
//! itself. Output is staged in a temporary directory so a half-written
//! wheel never lands next to good ones.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::process::{run_tool, ToolCommand};
use super::WheelRepairer;

/// `auditwheel repair` (Linux)
pub struct AuditwheelRepairer {
    binary_path: String,
}

impl Default for AuditwheelRepairer {
    fn default() -> Self {
        Self {
            binary_path: "auditwheel".to_string(),
        }
    }
}

impl AuditwheelRepairer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invocation repairing `wheel` into `staging`
    pub fn command(&self, wheel: &Path, lib_dirs: &[PathBuf], staging: &Path) -> Result<ToolCommand> {
        let mut cmd = ToolCommand::new(&self.binary_path)
            .arg("repair")
            .arg(wheel)
            .arg("-w")
            .arg(staging);
        if !lib_dirs.is_empty() {
            let joined: OsString =
                std::env::join_paths(lib_dirs).context("Invalid library search path")?;
            cmd = cmd.env("LD_LIBRARY_PATH", joined);
        }
        Ok(cmd)
    }
}

#[async_trait]
impl WheelRepairer for AuditwheelRepairer {
    fn name(&self) -> &str {
        "auditwheel"
    }

    async fn repair(&self, wheel: &Path, lib_dirs: &[PathBuf], out_dir: &Path) -> Result<PathBuf> {
        let staging = tempfile::tempdir().context("Failed to create wheel staging directory")?;
        let cmd = self.command(wheel, lib_dirs, staging.path())?;
        run_repair(self.name(), &cmd, staging.path(), out_dir).await
    }
}

/// `delvewheel repair` (Windows)
pub struct DelvewheelRepairer {
    binary_path: String,
}

impl Default for DelvewheelRepairer {
    fn default() -> Self {
        Self {
            binary_path: "delvewheel".to_string(),
        }
    }
}

impl DelvewheelRepairer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(&self, wheel: &Path, lib_dirs: &[PathBuf], staging: &Path) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.binary_path)
            .arg("repair")
            .arg(wheel)
            .arg("-w")
            .arg(staging);
        if !lib_dirs.is_empty() {
            // delvewheel always splits --add-path on ';'
            let joined = lib_dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(";");
            cmd = cmd.arg("--add-path").arg(joined);
        }
        cmd
    }
}

#[async_trait]
impl WheelRepairer for DelvewheelRepairer {
    fn name(&self) -> &str {
        "delvewheel"
    }

    async fn repair(&self, wheel: &Path, lib_dirs: &[PathBuf], out_dir: &Path) -> Result<PathBuf> {
        let staging = tempfile::tempdir().context("Failed to create wheel staging directory")?;
        let cmd = self.command(wheel, lib_dirs, staging.path());
        run_repair(self.name(), &cmd, staging.path(), out_dir).await
    }
}

async fn run_repair(tool: &str, cmd: &ToolCommand, staging: &Path, out_dir: &Path) -> Result<PathBuf> {
    let output = run_tool(cmd).await?;
    if !output.success() {
        anyhow::bail!(
            "{} exited with code {}: {}",
            tool,
            output.code().unwrap_or(-1),
            output.combined().trim()
        );
    }

    let repaired = find_wheel(staging)?
        .with_context(|| format!("{} produced no wheel", tool))?;
    let file_name = repaired
        .file_name()
        .context("Repaired wheel has no file name")?;

    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let dest = out_dir.join(file_name);
    // Staging may sit on another filesystem, so copy rather than rename
    tokio::fs::copy(&repaired, &dest)
        .await
        .with_context(|| format!("Failed to copy wheel to {}", dest.display()))?;

    Ok(dest)
}

/// First `*.whl` in `dir`, in name order
pub fn find_wheel(dir: &Path) -> Result<Option<PathBuf>> {
    let pattern = dir.join("*.whl");
    let mut wheels: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .context("Invalid wheel pattern")?
        .filter_map(|entry| entry.ok())
        .collect();
    wheels.sort();
    Ok(wheels.into_iter().next())
}
