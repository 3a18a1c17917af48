//! Artifact packaging.
//!
//! Makes a target's install tree self-contained: every shared library its
//! primary binaries need (directly or transitively) is copied next to them
//! from the first search root that has it. Copies never replace a file that
//! is already there, so the first writer wins and re-packaging is a no-op.

use std::collections::{HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, instrument, warn};

use super::search::{is_bare_name, LibrarySource, SearchRoots};
use crate::adapters::{DependencyInspector, WheelRepairer};
use crate::config::paths::{runtime_lib_dir, DEFAULT_WHEEL_DIR, WHEELHOUSE_DIR};
use crate::config::BuildType;
use crate::domain::{Artifact, Target};
use crate::error::ForgeError;

/// Toolchain locations and switches packaging depends on
#[derive(Debug, Clone, Default)]
pub struct PackagingSettings {
    pub build_type: BuildType,
    /// Accelerated run; gates the CUDA and cuDSS roots
    pub cuda: bool,
    /// vcpkg runtime library directory (installed/<triplet>/{bin,lib})
    pub vcpkg_lib_dir: Option<PathBuf>,
    pub cuda_runtime_dir: Option<PathBuf>,
    pub cudss_lib_dir: Option<PathBuf>,
    /// Destination for distribution archives
    pub dist_dir: PathBuf,
}

/// Bundles runtime dependencies into install trees
pub struct Packager {
    inspector: Arc<dyn DependencyInspector>,
    repairer: Option<Arc<dyn WheelRepairer>>,
    settings: PackagingSettings,
}

impl Packager {
    pub fn new(
        inspector: Arc<dyn DependencyInspector>,
        repairer: Option<Arc<dyn WheelRepairer>>,
        settings: PackagingSettings,
    ) -> Self {
        Self {
            inspector,
            repairer,
            settings,
        }
    }

    pub fn settings(&self) -> &PackagingSettings {
        &self.settings
    }

    /// Search roots for `target`, highest priority first
    ///
    /// `prerequisite_installs` are the install prefixes of the target's
    /// prerequisites; their runtime libraries count as build output.
    pub fn search_roots(&self, target: &Target, prerequisite_installs: &[PathBuf]) -> SearchRoots {
        let mut roots = SearchRoots::new();

        roots.push(LibrarySource::BuildOutput, runtime_lib_dir(&target.install_path));
        roots.push(LibrarySource::BuildOutput, target.build_path.clone());
        for prefix in prerequisite_installs {
            roots.push(LibrarySource::BuildOutput, runtime_lib_dir(prefix));
        }

        if let Some(ref dir) = self.settings.vcpkg_lib_dir {
            roots.push(LibrarySource::PackageManager, dir.clone());
        }

        if self.settings.cuda && target.accelerated {
            if let Some(ref dir) = self.settings.cuda_runtime_dir {
                roots.push(LibrarySource::AcceleratorRuntime, dir.clone());
            }
            if let Some(ref dir) = self.settings.cudss_lib_dir {
                roots.push(LibrarySource::SparseSolver, dir.clone());
            }
        }

        roots
    }

    /// Bundle `target`'s runtime closure into its install tree
    #[instrument(skip_all, fields(target = %target.name))]
    pub async fn package(
        &self,
        target: &Target,
        prerequisite_installs: &[PathBuf],
    ) -> Result<Artifact, ForgeError> {
        let fail = |reason: String| ForgeError::Packaging {
            target: target.name.clone(),
            reason,
        };

        if !target.install_path.is_dir() {
            return Err(fail(format!(
                "install root {} does not exist",
                target.install_path.display()
            )));
        }

        let mut artifact = Artifact::new(&target.name, &target.install_path);
        let primaries = primary_binaries(target).map_err(fail)?;
        let roots = self.search_roots(target, prerequisite_installs);

        let bundle_dir = match target.package.bundle_dir {
            Some(ref dir) => target.install_path.join(dir),
            None => runtime_lib_dir(&target.install_path),
        };
        if !primaries.is_empty() {
            std::fs::create_dir_all(&bundle_dir).map_err(|e| {
                fail(format!("cannot create {}: {}", bundle_dir.display(), e))
            })?;
        }

        // (binary, is_primary)
        let mut queue: VecDeque<(PathBuf, bool)> =
            primaries.into_iter().map(|p| (p, true)).collect();
        let mut seen: HashSet<String> = HashSet::new();

        while let Some((binary, primary)) = queue.pop_front() {
            let deps = match self.inspector.dependencies(&binary).await {
                Ok(deps) => deps,
                Err(e) if primary => {
                    return Err(fail(format!(
                        "cannot inspect {}: {:#}",
                        binary.display(),
                        e
                    )));
                }
                Err(e) => {
                    warn!(library = %binary.display(), error = %e, "cannot inspect bundled library, skipping its dependencies");
                    continue;
                }
            };

            for dep in deps {
                if !seen.insert(library_key(&dep)) {
                    continue;
                }
                if !is_bare_name(Path::new(&dep)) {
                    debug!(dependency = %dep, "not a plain file name, leaving to the loader");
                    continue;
                }

                let Some((found, source)) = roots.find(&dep) else {
                    debug!(dependency = %dep, "not in any search root, assuming system library");
                    continue;
                };

                let dest = bundle_dir.join(&dep);
                if found != dest {
                    let copied = copy_if_absent(&found, &dest).map_err(|e| {
                        fail(format!("cannot copy {} to {}: {}", found.display(), dest.display(), e))
                    })?;
                    if copied {
                        debug!(library = %dep, from = %source, "bundled");
                        artifact.bundled_libraries.push(dest.clone());
                    } else {
                        debug!(library = %dep, "already present, keeping existing copy");
                    }
                }
                queue.push_back((found, false));
            }
        }

        if target.package.wheel {
            artifact.wheels = self.repair_wheels(target, &roots).await;
        }

        info!(
            bundled = artifact.bundled_libraries.len(),
            wheels = artifact.wheels.len(),
            "packaged"
        );
        Ok(artifact)
    }

    /// Repair every wheel the build produced; failures only warn
    async fn repair_wheels(&self, target: &Target, roots: &SearchRoots) -> Vec<PathBuf> {
        let wheel_dir = target
            .build_path
            .join(target.package.wheel_dir.as_deref().unwrap_or(Path::new(DEFAULT_WHEEL_DIR)));
        let wheelhouse = target.install_path.join(WHEELHOUSE_DIR);

        let wheels = match glob_files(&wheel_dir.join("*.whl")) {
            Ok(w) if !w.is_empty() => w,
            Ok(_) => {
                warn!(dir = %wheel_dir.display(), "no wheel found to package");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "cannot list wheels");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for wheel in wheels {
            match self.repairer {
                Some(ref repairer) => {
                    match repairer.repair(&wheel, &roots.dirs(), &wheelhouse).await {
                        Ok(repaired) => out.push(repaired),
                        Err(e) => {
                            warn!(wheel = %wheel.display(), tool = repairer.name(), error = %e, "wheel repair failed, skipping")
                        }
                    }
                }
                None => {
                    let dest = match wheel.file_name() {
                        Some(name) => wheelhouse.join(name),
                        None => continue,
                    };
                    let copied = std::fs::create_dir_all(&wheelhouse)
                        .and_then(|_| std::fs::copy(&wheel, &dest));
                    match copied {
                        Ok(_) => out.push(dest),
                        Err(e) => warn!(wheel = %wheel.display(), error = %e, "cannot copy wheel"),
                    }
                }
            }
        }
        out
    }

    /// Write `<dist>/<target>-<config>.tar.gz` from the artifact's install root
    pub async fn archive(&self, artifact: &mut Artifact) -> Result<PathBuf, ForgeError> {
        let dist = self.settings.dist_dir.clone();
        let name = format!("{}-{}", artifact.target_name, self.settings.build_type);
        let root = artifact.install_root.clone();
        let target_name = artifact.target_name.clone();

        let path = tokio::task::spawn_blocking(move || write_archive(&dist, &name, &root))
            .await
            .map_err(|e| ForgeError::Tool(anyhow::anyhow!("archive task failed: {}", e)))?
            .map_err(|e| ForgeError::Packaging {
                target: target_name,
                reason: format!("cannot write archive: {}", e),
            })?;

        info!(archive = %path.display(), "archive written");
        artifact.archive = Some(path.clone());
        Ok(path)
    }
}

/// Copy `src` to `dest` unless `dest` already exists
///
/// Returns whether a copy happened. The existence check and the creation
/// are one operation (`create_new`), so a concurrent writer cannot be
/// overwritten either.
pub fn copy_if_absent(src: &Path, dest: &Path) -> io::Result<bool> {
    let mut out = match OpenOptions::new().write(true).create_new(true).open(dest) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };

    let result = File::open(src).and_then(|mut input| {
        io::copy(&mut input, &mut out)?;
        let perms = input.metadata()?.permissions();
        out.set_permissions(perms)
    });

    if let Err(e) = result {
        // Leave nothing half-written behind
        drop(out);
        let _ = std::fs::remove_file(dest);
        return Err(e);
    }
    Ok(true)
}

/// Primary binaries matched by the target's globs
///
/// A pattern that matches nothing means the build did not produce what
/// the manifest promised.
fn primary_binaries(target: &Target) -> Result<Vec<PathBuf>, String> {
    let mut out = Vec::new();
    for pattern in &target.package.binaries {
        let files = glob_files(&target.install_path.join(pattern))?;
        if files.is_empty() {
            return Err(format!(
                "no file matches '{}' below {}",
                pattern,
                target.install_path.display()
            ));
        }
        for file in files {
            if !out.contains(&file) {
                out.push(file);
            }
        }
    }
    Ok(out)
}

fn glob_files(pattern: &Path) -> Result<Vec<PathBuf>, String> {
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| format!("invalid pattern '{}': {}", pattern.display(), e))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Library names compare case-insensitively where the filesystem does
fn library_key(name: &str) -> String {
    if cfg!(windows) {
        name.to_ascii_lowercase()
    } else {
        name.to_string()
    }
}

fn write_archive(dist: &Path, name: &str, root: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dist)?;
    let path = dist.join(format!("{}.tar.gz", name));

    let mut tmp = tempfile::NamedTempFile::new_in(dist)?;
    {
        let encoder = GzEncoder::new(tmp.as_file_mut(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder.append_dir_all(name, root)?;
        builder.into_inner()?.finish()?;
    }

    tmp.persist(&path).map_err(|e| e.error)?;
    Ok(path)
}
