//! Release publishing.
//!
//! Creates a tagged release and attaches files one after another, finishing
//! with a `SHA256SUMS` manifest of everything uploaded. With overwrite, an
//! existing release is deleted first; if that delete fails the create call
//! reports the conflict.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::adapters::{Release, ReleaseApi, ReleaseAsset};
use crate::config::paths::CHECKSUM_ASSET;
use crate::domain::Artifact;
use crate::error::ForgeError;

/// What to publish
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub tag: String,
    pub title: String,
    pub notes: String,
    pub files: Vec<PathBuf>,
    pub overwrite: bool,
}

impl PublishRequest {
    /// Request attaching every release file of `artifacts`
    pub fn for_artifacts(
        artifacts: &[Artifact],
        tag: impl Into<String>,
        notes: impl Into<String>,
    ) -> Self {
        let tag = tag.into();
        Self {
            title: tag.clone(),
            tag,
            notes: notes.into(),
            files: artifacts.iter().flat_map(Artifact::release_files).collect(),
            overwrite: false,
        }
    }
}

/// Outcome of a publish
#[derive(Debug, Clone, Serialize)]
pub struct PublishResult {
    pub release: Release,
    /// Uploaded assets in upload order; the checksum manifest is last
    pub assets: Vec<ReleaseAsset>,
    /// An existing release with the same tag was deleted first
    pub replaced: bool,
}

/// Publishes releases through a [`ReleaseApi`]
pub struct Publisher {
    api: Arc<dyn ReleaseApi>,
}

impl Publisher {
    pub fn new(api: Arc<dyn ReleaseApi>) -> Self {
        Self { api }
    }

    #[instrument(skip_all, fields(tag = %req.tag))]
    pub async fn publish(&self, req: &PublishRequest) -> Result<PublishResult, ForgeError> {
        validate_files(&req.files)?;

        let mut replaced = false;
        if let Some(existing) = self.api.find_release(&req.tag).await? {
            if !req.overwrite {
                return Err(ForgeError::Conflict {
                    tag: req.tag.clone(),
                });
            }
            match self.api.delete_release(&existing).await {
                Ok(()) => {
                    info!(release = existing.id, "deleted existing release");
                    replaced = true;
                }
                Err(e) => warn!(error = %e, "could not delete existing release, trying to create anyway"),
            }
        }

        let release = self.api.create_release(&req.tag, &req.title, &req.notes).await?;
        info!(url = %release.html_url, "release created");

        let checksums_dir = tempfile::tempdir()?;
        let checksums_path = checksums_dir.path().join(CHECKSUM_ASSET);
        std::fs::write(&checksums_path, checksum_manifest(&req.files)?)?;

        let mut assets = Vec::with_capacity(req.files.len() + 1);
        for file in req.files.iter().chain(std::iter::once(&checksums_path)) {
            info!(asset = %file.display(), "uploading");
            assets.push(self.api.upload_asset(&release, file).await?);
        }

        Ok(PublishResult {
            release,
            assets,
            replaced,
        })
    }
}

/// Files must exist and have distinct names; the checksum name is reserved
fn validate_files(files: &[PathBuf]) -> Result<(), ForgeError> {
    if files.is_empty() {
        return Err(ForgeError::Tool(anyhow::anyhow!("nothing to publish")));
    }

    let mut names = HashSet::new();
    for file in files {
        if !file.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("release file {} does not exist", file.display()),
            )
            .into());
        }
        let name = asset_name(file);
        if name == CHECKSUM_ASSET || !names.insert(name.clone()) {
            return Err(ForgeError::Tool(anyhow::anyhow!(
                "duplicate or reserved asset name '{}'",
                name
            )));
        }
    }
    Ok(())
}

fn asset_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// `sha256sum`-compatible manifest of `files`
pub fn checksum_manifest(files: &[PathBuf]) -> io::Result<String> {
    let mut out = String::new();
    for file in files {
        out.push_str(&format!("{}  {}\n", sha256_file(file)?, asset_name(file)));
    }
    Ok(out)
}

/// Regular files directly inside `dir`, sorted, excluding a stale checksum manifest
pub fn collect_release_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && asset_name(&path) != CHECKSUM_ASSET {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
