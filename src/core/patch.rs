//! Upstream build-file patches.
//!
//! A patch is an exact text replacement in one file of a target's source
//! tree. Applying is idempotent: a file where the pattern no longer occurs
//! and the replacement does is left alone.

use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{PatchSpec, Target};
use crate::error::ForgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchOutcome {
    Applied,
    AlreadyApplied,
}

impl PatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already-applied",
        }
    }
}

/// Apply one patch to `target`'s source tree
pub fn apply_patch(target: &Target, patch: &PatchSpec) -> Result<PatchOutcome, ForgeError> {
    let path = target.source_path.join(&patch.file);
    let fail = |reason: String| ForgeError::Patch {
        target: target.name.clone(),
        patch: patch.id.clone(),
        file: path.clone(),
        reason,
    };

    if patch.pattern.is_empty() {
        return Err(fail("pattern cannot be empty".to_string()));
    }

    let content =
        std::fs::read_to_string(&path).map_err(|e| fail(format!("cannot read file: {}", e)))?;

    let outcome = if pending(&content, &patch.pattern, &patch.replacement) {
        let patched = replace_outside(&content, &patch.pattern, &patch.replacement);
        write_atomically(&path, &patched).map_err(|e| fail(e.to_string()))?;
        PatchOutcome::Applied
    } else if patch.replacement.is_empty() || content.contains(&patch.replacement) {
        PatchOutcome::AlreadyApplied
    } else {
        return Err(fail(
            "pattern not found; the upstream file changed and the patch needs a new revision"
                .to_string(),
        ));
    };

    info!(
        target = %target.name,
        patch = %patch.id,
        file = %patch.file.display(),
        outcome = outcome.as_str(),
        "patch"
    );
    Ok(outcome)
}

/// Apply every patch declared on `target`, in order
pub fn apply_patches(target: &Target) -> Result<Vec<(String, PatchOutcome)>, ForgeError> {
    target
        .patches
        .iter()
        .map(|p| apply_patch(target, p).map(|o| (p.id.clone(), o)))
        .collect()
}

/// Whether `pattern` still occurs outside every copy of `replacement`
fn pending(content: &str, pattern: &str, replacement: &str) -> bool {
    if replacement.is_empty() || !replacement.contains(pattern) {
        return content.contains(pattern);
    }
    content.split(replacement).any(|rest| rest.contains(pattern))
}

/// Replace `pattern`, leaving text that already reads as `replacement` untouched
fn replace_outside(content: &str, pattern: &str, replacement: &str) -> String {
    if replacement.is_empty() || !replacement.contains(pattern) {
        return content.replace(pattern, replacement);
    }
    content
        .split(replacement)
        .map(|rest| rest.replace(pattern, replacement))
        .collect::<Vec<_>>()
        .join(replacement)
}

fn write_atomically(path: &std::path::Path, content: &str) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent directory"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BuildSpec, PackageSpec};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn target(source: PathBuf, patches: Vec<PatchSpec>) -> Target {
        Target {
            name: "colmap".to_string(),
            description: String::new(),
            install_path: source.join("install"),
            build_path: source.join("build"),
            install_marker_path: source.join("install/.m"),
            source_path: source,
            prerequisites: Vec::new(),
            build: BuildSpec::default(),
            pins: Vec::new(),
            patches,
            package: PackageSpec::default(),
            accelerated: false,
        }
    }

    fn spec(pattern: &str, replacement: &str) -> PatchSpec {
        PatchSpec {
            id: "cuda-arch-v1".to_string(),
            file: PathBuf::from("CMakeLists.txt"),
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        }
    }

    #[test]
    fn test_apply_then_already_applied() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("CMakeLists.txt");
        std::fs::write(&file, "set(CMAKE_CUDA_ARCHITECTURES 75)\n").unwrap();

        let p = spec("ARCHITECTURES 75", "ARCHITECTURES native");
        let t = target(dir.path().to_path_buf(), vec![p.clone()]);

        assert_eq!(apply_patch(&t, &p).unwrap(), PatchOutcome::Applied);
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            "set(CMAKE_CUDA_ARCHITECTURES native)\n"
        );
        assert_eq!(apply_patch(&t, &p).unwrap(), PatchOutcome::AlreadyApplied);

        let all = apply_patches(&t).unwrap();
        assert_eq!(all, vec![("cuda-arch-v1".to_string(), PatchOutcome::AlreadyApplied)]);
    }

    #[test]
    fn test_deletion_patch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("CMakeLists.txt"), "a\nfind_package(Qt5)\nb\n").unwrap();
        let p = spec("find_package(Qt5)\n", "");
        let t = target(dir.path().to_path_buf(), vec![]);

        assert_eq!(apply_patch(&t, &p).unwrap(), PatchOutcome::Applied);
        assert_eq!(apply_patch(&t, &p).unwrap(), PatchOutcome::AlreadyApplied);
    }

    #[test]
    fn test_stale_patch_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("CMakeLists.txt"), "something else\n").unwrap();
        let p = spec("ARCHITECTURES 75", "ARCHITECTURES native");
        let t = target(dir.path().to_path_buf(), vec![]);

        let err = apply_patch(&t, &p).unwrap_err();
        assert!(matches!(err, ForgeError::Patch { .. }));
        assert!(err.to_string().contains("cuda-arch-v1"));
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let p = spec("x", "y");
        let t = target(dir.path().to_path_buf(), vec![]);
        assert!(matches!(apply_patch(&t, &p), Err(ForgeError::Patch { .. })));
    }

    #[test]
    fn test_replacement_elsewhere_still_applies() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("CMakeLists.txt");
        std::fs::write(
            &file,
            "target_link_libraries(a Ceres::ceres)\ntarget_link_libraries(b ceres)\n",
        )
        .unwrap();
        let p = spec("target_link_libraries(b ceres)", "target_link_libraries(b Ceres::ceres)");
        let t = target(dir.path().to_path_buf(), vec![]);

        assert_eq!(apply_patch(&t, &p).unwrap(), PatchOutcome::Applied);
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            "target_link_libraries(a Ceres::ceres)\ntarget_link_libraries(b Ceres::ceres)\n"
        );
        assert_eq!(apply_patch(&t, &p).unwrap(), PatchOutcome::AlreadyApplied);
    }

    #[test]
    fn test_bare_replacement_text_elsewhere_still_applies() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("CMakeLists.txt");
        std::fs::write(
            &file,
            "target_link_libraries(a Ceres::ceres)\ntarget_link_libraries(b ceres)\n",
        )
        .unwrap();
        let p = spec("target_link_libraries(b ceres)", "Ceres::ceres");
        let t = target(dir.path().to_path_buf(), vec![]);

        assert_eq!(apply_patch(&t, &p).unwrap(), PatchOutcome::Applied);
        let patched = std::fs::read_to_string(&file).unwrap();
        assert!(!patched.contains("target_link_libraries(b ceres)"));
        assert_eq!(apply_patch(&t, &p).unwrap(), PatchOutcome::AlreadyApplied);
    }

    #[test]
    fn test_replacement_wrapping_pattern_is_not_doubled() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("CMakeLists.txt");
        std::fs::write(&file, "find_package(Ceres)\nfind_package(Ceres REQUIRED)\n").unwrap();
        let p = spec("find_package(Ceres", "find_package(Ceres REQUIRED");
        let t = target(dir.path().to_path_buf(), vec![]);

        // Both lines contain the pattern, but only the first lacks REQUIRED
        assert_eq!(apply_patch(&t, &p).unwrap(), PatchOutcome::Applied);
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            "find_package(Ceres REQUIRED)\nfind_package(Ceres REQUIRED)\n"
        );
        assert_eq!(apply_patch(&t, &p).unwrap(), PatchOutcome::AlreadyApplied);
    }
}
