//! External process invocation.
//!
//! Tools are spawned directly (never through a shell) with an explicit
//! working directory and environment additions. Output is forwarded line by
//! line to tracing and kept so failures can show the tool's own text.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// A fully specified tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, OsString>,
    /// Inherited variables hidden from the tool unless set in `env`
    pub env_remove: BTreeSet<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            env_remove: BTreeSet::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.insert(key.into());
        self
    }

    /// Command line for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| {
                let s = s.to_string_lossy();
                if s.contains(' ') {
                    format!("\"{}\"", s)
                } else {
                    s.into_owned()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished tool
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Everything the tool printed, stdout first
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Run a tool to completion, capturing its output
///
/// Only a failure to spawn or wait is an error; a nonzero exit status is
/// reported through [`ToolOutput::status`].
pub async fn run_tool(cmd: &ToolCommand) -> Result<ToolOutput> {
    info!(command = %cmd.display(), "running");

    let mut command = Command::new(&cmd.program);
    for key in cmd.env_remove.iter().filter(|k| !cmd.env.contains_key(*k)) {
        command.env_remove(key);
    }
    command
        .args(&cmd.args)
        .envs(&cmd.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref cwd) = cmd.cwd {
        command.current_dir(cwd);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn '{}'", cmd.program.to_string_lossy()))?;

    let stdout = child.stdout.take().context("stdout was not captured")?;
    let stderr = child.stderr.take().context("stderr was not captured")?;

    let (stdout, stderr, status) = tokio::join!(
        forward_lines(stdout, "stdout"),
        forward_lines(stderr, "stderr"),
        child.wait()
    );

    let status = status
        .with_context(|| format!("Failed to wait for '{}'", cmd.program.to_string_lossy()))?;

    Ok(ToolOutput {
        status,
        stdout: stdout?,
        stderr: stderr?,
    })
}

async fn forward_lines<R>(reader: R, stream: &'static str) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut captured = String::new();

    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("Failed to read tool {}", stream))?
    {
        debug!(stream, "{}", line);
        captured.push_str(&line);
        captured.push('\n');
    }

    Ok(captured)
}
