//! Packaged outputs of successfully built targets.
//!
//! An artifact is the install tree of a target plus the shared libraries
//! bundled into it so that it runs without the build machine's toolchains.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Self-contained output of a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Name of the target that produced this artifact
    pub target_name: String,

    /// Install prefix the artifact lives in
    pub install_root: PathBuf,

    /// Libraries copied into the install tree by packaging
    #[serde(default)]
    pub bundled_libraries: Vec<PathBuf>,

    /// Repaired Python wheels
    #[serde(default)]
    pub wheels: Vec<PathBuf>,

    /// Distribution archive, once one has been written
    #[serde(default)]
    pub archive: Option<PathBuf>,

    /// When packaging finished
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create an artifact with nothing bundled yet
    pub fn new(target_name: impl Into<String>, install_root: impl Into<PathBuf>) -> Self {
        Self {
            target_name: target_name.into(),
            install_root: install_root.into(),
            bundled_libraries: Vec::new(),
            wheels: Vec::new(),
            archive: None,
            created_at: Utc::now(),
        }
    }

    /// Files suitable for attaching to a release
    pub fn release_files(&self) -> Vec<PathBuf> {
        self.archive
            .iter()
            .chain(self.wheels.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_creation() {
        let artifact = Artifact::new("glomap", "/ws/install/glomap");

        assert_eq!(artifact.target_name, "glomap");
        assert!(artifact.bundled_libraries.is_empty());
        assert!(artifact.release_files().is_empty());
    }

    #[test]
    fn test_release_files_order() {
        let mut artifact = Artifact::new("pycolmap", "/ws/install/pycolmap");
        artifact.wheels.push(PathBuf::from("/w/pycolmap-3.11-cp312.whl"));
        artifact.archive = Some(PathBuf::from("/dist/pycolmap-Release.tar.gz"));

        assert_eq!(
            artifact.release_files(),
            vec![
                PathBuf::from("/dist/pycolmap-Release.tar.gz"),
                PathBuf::from("/w/pycolmap-3.11-cp312.whl"),
            ]
        );
    }

    #[test]
    fn test_artifact_serialization() {
        let mut artifact = Artifact::new("colmap", "/ws/install/colmap");
        artifact
            .bundled_libraries
            .push(PathBuf::from("/ws/install/colmap/lib/libceres.so.4"));

        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: Artifact = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, artifact);
    }
}
