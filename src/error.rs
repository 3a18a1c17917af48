//! Error taxonomy for orchestrator runs.
//!
//! Pin resolution and graph execution errors abort the run and are shown
//! to the operator verbatim, including whatever the wrapped tool printed.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the orchestrator core
#[derive(Debug, Error)]
pub enum ForgeError {
    /// The downstream build configuration has no usable commit pin
    #[error("failed to parse pin in {}: {reason}", .path.display())]
    ConfigParse { path: PathBuf, reason: String },

    /// The pinned commit is absent from the upstream repository even after a fetch
    #[error("commit {commit} not found in '{upstream}' after fetch: {detail}")]
    CommitNotFound {
        upstream: String,
        commit: String,
        detail: String,
    },

    /// Checkout reported success but the working tree did not move
    #[error("checkout of '{upstream}' did not land on {expected} (HEAD is {actual}){}", detail_suffix(.detail))]
    Verification {
        upstream: String,
        expected: String,
        actual: String,
        detail: Option<String>,
    },

    /// The target graph has no valid topological order
    #[error("dependency cycle between targets: {}", .targets.join(", "))]
    Cycle { targets: Vec<String> },

    /// An external build step exited unsuccessfully
    #[error("target '{target}' failed during {step} (exit code {}):\n{output}", exit_code(.code))]
    BuildCommand {
        target: String,
        step: String,
        code: Option<i32>,
        output: String,
    },

    /// Required packaging input is missing or unreadable
    #[error("packaging '{target}' failed: {reason}")]
    Packaging { target: String, reason: String },

    /// A declared upstream patch could not be applied
    #[error("patch '{patch}' for '{target}' ({}) failed: {reason}", .file.display())]
    Patch {
        target: String,
        patch: String,
        file: PathBuf,
        reason: String,
    },

    /// The release endpoint rejected our credentials
    #[error("release endpoint rejected credentials ({status}): {message}")]
    Auth { status: u16, message: String },

    /// A release with this tag already exists
    #[error("release '{tag}' already exists (use --overwrite to replace it)")]
    Conflict { tag: String },

    /// Any other unexpected response from the release endpoint
    #[error("release endpoint returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    #[error("target '{target}' depends on undeclared target '{prerequisite}'")]
    UnknownPrerequisite {
        target: String,
        prerequisite: String,
    },

    #[error("target '{0}' is declared more than once")]
    DuplicateTarget(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Another orchestrator run holds the lock
    #[error("another sfmforge run holds {}", .lock_path.display())]
    AlreadyRunning { lock_path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure to launch or talk to an external tool
    #[error(transparent)]
    Tool(#[from] anyhow::Error),
}

fn exit_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none, terminated by signal".to_string())
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) if !d.trim().is_empty() => format!(": {}", d.trim()),
        _ => String::new(),
    }
}

impl ForgeError {
    /// Short machine-friendly name, used in event logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigParse { .. } => "config_parse",
            Self::CommitNotFound { .. } => "commit_not_found",
            Self::Verification { .. } => "verification",
            Self::Cycle { .. } => "cycle",
            Self::BuildCommand { .. } => "build_command",
            Self::Packaging { .. } => "packaging",
            Self::Patch { .. } => "patch",
            Self::Auth { .. } => "auth",
            Self::Conflict { .. } => "conflict",
            Self::Remote { .. } => "remote",
            Self::UnknownTarget(_)
            | Self::UnknownPrerequisite { .. }
            | Self::DuplicateTarget(_)
            | Self::InvalidManifest(_) => "manifest",
            Self::AlreadyRunning { .. } => "already_running",
            Self::Io(_) => "io",
            Self::Tool(_) => "tool",
        }
    }
}
