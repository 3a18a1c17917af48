//! Target manifest loading and validation.
//!
//! A manifest is a YAML list of target declarations. The built-in manifest
//! ships with the binary; a user manifest (from the config file or
//! `--manifest`) replaces built-in targets of the same name and appends
//! new ones.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::graph::topological_order;
use super::template::{placeholders, INSTALL_OF, KNOWN_PLACEHOLDERS};
use crate::config::paths::DEFAULT_MARKER;
use crate::domain::{BuildSpec, PackageSpec, PatchSpec, PinSpec, Target};
use crate::error::ForgeError;

/// Manifest compiled into the binary
pub const BUILTIN_MANIFEST: &str = include_str!("../../manifests/default.yaml");

/// Raw manifest schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestFile {
    #[serde(default)]
    pub version: Option<String>,
    pub targets: Vec<TargetDecl>,
}

/// A target as written in the manifest, paths still workspace-relative
#[derive(Debug, Clone, Deserialize)]
pub struct TargetDecl {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source: PathBuf,
    #[serde(default)]
    pub install: Option<PathBuf>,
    #[serde(default)]
    pub build_dir: Option<PathBuf>,
    /// Marker file, relative to the install root
    #[serde(default)]
    pub marker: Option<PathBuf>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub build: BuildSpec,
    #[serde(default)]
    pub pins: Vec<PinSpec>,
    #[serde(default)]
    pub patches: Vec<PatchSpec>,
    #[serde(default)]
    pub package: PackageSpec,
    #[serde(default)]
    pub accelerated: bool,
}

impl TargetDecl {
    fn resolve(self, workspace: &Path) -> Target {
        let install_path = workspace.join(
            self.install
                .unwrap_or_else(|| Path::new("install").join(&self.name)),
        );
        let build_path = workspace.join(
            self.build_dir
                .unwrap_or_else(|| Path::new("build").join(&self.name)),
        );
        let install_marker_path =
            install_path.join(self.marker.unwrap_or_else(|| PathBuf::from(DEFAULT_MARKER)));

        Target {
            name: self.name,
            description: self.description,
            source_path: workspace.join(self.source),
            install_path,
            build_path,
            prerequisites: self.prerequisites,
            build: self.build,
            install_marker_path,
            pins: self.pins,
            patches: self.patches,
            package: self.package,
            accelerated: self.accelerated,
        }
    }
}

/// Validated set of targets, in declaration order
#[derive(Debug, Clone)]
pub struct Manifest {
    targets: Vec<Target>,
}

fn parse(content: &str, origin: &str) -> Result<ManifestFile, ForgeError> {
    serde_yaml::from_str(content)
        .map_err(|e| ForgeError::InvalidManifest(format!("{}: {}", origin, e)))
}

impl Manifest {
    /// Built-in manifest, optionally overlaid with a user manifest file
    pub fn load(workspace: &Path, user_manifest: Option<&Path>) -> Result<Self, ForgeError> {
        let mut decls = parse(BUILTIN_MANIFEST, "built-in manifest")?.targets;

        if let Some(path) = user_manifest {
            let content = std::fs::read_to_string(path).map_err(|e| {
                ForgeError::InvalidManifest(format!("cannot read {}: {}", path.display(), e))
            })?;
            let user = parse(&content, &path.display().to_string())?;
            check_duplicates(&user.targets)?;

            for decl in user.targets {
                match decls.iter().position(|d| d.name == decl.name) {
                    Some(idx) => {
                        debug!(target = %decl.name, "user manifest overrides built-in target");
                        decls[idx] = decl;
                    }
                    None => decls.push(decl),
                }
            }
        }

        Self::from_decls(decls, workspace)
    }

    /// Parse a standalone manifest (no built-in targets)
    pub fn from_yaml(content: &str, workspace: &Path) -> Result<Self, ForgeError> {
        Self::from_decls(parse(content, "manifest")?.targets, workspace)
    }

    fn from_decls(decls: Vec<TargetDecl>, workspace: &Path) -> Result<Self, ForgeError> {
        check_duplicates(&decls)?;
        let manifest = Self {
            targets: decls.into_iter().map(|d| d.resolve(workspace)).collect(),
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate references, templates and the graph itself
    pub fn validate(&self) -> Result<(), ForgeError> {
        let names: HashSet<&str> = self.targets.iter().map(|t| t.name.as_str()).collect();

        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ForgeError::InvalidManifest(
                    "target name cannot be empty".to_string(),
                ));
            }

            for prereq in &target.prerequisites {
                if !names.contains(prereq.as_str()) {
                    return Err(ForgeError::UnknownPrerequisite {
                        target: target.name.clone(),
                        prerequisite: prereq.clone(),
                    });
                }
            }

            for pin in &target.pins {
                if !names.contains(pin.upstream.as_str()) {
                    return Err(ForgeError::InvalidManifest(format!(
                        "target '{}' pins undeclared target '{}'",
                        target.name, pin.upstream
                    )));
                }
                if pin.upstream == target.name {
                    return Err(ForgeError::InvalidManifest(format!(
                        "target '{}' pins itself",
                        target.name
                    )));
                }
            }

            let templates: Vec<&String> = match target.build {
                BuildSpec::Cmake { ref args } => args.iter().collect(),
                BuildSpec::Command { ref steps } => {
                    if steps.is_empty() || steps.iter().any(|s| s.is_empty()) {
                        return Err(ForgeError::InvalidManifest(format!(
                            "target '{}' has an empty command step",
                            target.name
                        )));
                    }
                    steps.iter().flatten().collect()
                }
            };

            for template in templates {
                let used = placeholders(template).map_err(|e| {
                    ForgeError::InvalidManifest(format!("target '{}': {}", target.name, e))
                })?;
                for name in used {
                    let known = KNOWN_PLACEHOLDERS.contains(&name.as_str())
                        || name
                            .strip_prefix(INSTALL_OF)
                            .map(|t| names.contains(t))
                            .unwrap_or(false);
                    if !known {
                        return Err(ForgeError::InvalidManifest(format!(
                            "target '{}' uses unknown placeholder '{{{}}}'",
                            target.name, name
                        )));
                    }
                }
            }
        }

        topological_order(&self.targets)?;
        Ok(())
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn get(&self, name: &str) -> Result<&Target, ForgeError> {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ForgeError::UnknownTarget(name.to_string()))
    }

    /// Requested targets plus everything they transitively need, in declaration order
    ///
    /// An empty request selects every target.
    pub fn select(&self, requested: &[String]) -> Result<Vec<Target>, ForgeError> {
        if requested.is_empty() {
            return Ok(self.targets.clone());
        }

        let mut wanted: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        for name in requested {
            stack.push(self.get(name)?.name.as_str());
        }

        while let Some(name) = stack.pop() {
            if !wanted.insert(name) {
                continue;
            }
            let target = self.get(name)?;
            stack.extend(target.prerequisites.iter().map(String::as_str));
        }

        Ok(self
            .targets
            .iter()
            .filter(|t| wanted.contains(t.name.as_str()))
            .cloned()
            .collect())
    }
}

fn check_duplicates(decls: &[TargetDecl]) -> Result<(), ForgeError> {
    let mut seen = HashSet::new();
    for decl in decls {
        if !seen.insert(decl.name.as_str()) {
            return Err(ForgeError::DuplicateTarget(decl.name.clone()));
        }
    }
    Ok(())
}
