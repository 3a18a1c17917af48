//! Pin resolution.
//!
//! A downstream target declares, in its own CMake fetch file, the exact
//! upstream commit it was developed against. Before anything is built the
//! upstream checkout is moved to that commit and the move is verified.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::fetch_parser::read_pin;
use super::manifest::Manifest;
use crate::adapters::Vcs;
use crate::domain::{PinDeclaration, PinSpec, SyncResult, Target};
use crate::error::ForgeError;

/// Synchronizes upstream checkouts with downstream pins
pub struct PinResolver {
    vcs: Arc<dyn Vcs>,
}

impl PinResolver {
    pub fn new(vcs: Arc<dyn Vcs>) -> Self {
        Self { vcs }
    }

    /// Read the pin `downstream` declares for `spec.upstream`
    pub fn declaration(downstream: &Target, spec: &PinSpec) -> Result<PinDeclaration, ForgeError> {
        let file = downstream.source_path.join(&spec.file);
        let expected_commit = read_pin(&file, &spec.fetch_name)?;

        Ok(PinDeclaration {
            downstream_target: downstream.name.clone(),
            upstream_target: spec.upstream.clone(),
            expected_commit,
        })
    }

    /// Every pin declared by `selected`, in target order
    pub fn declarations(selected: &[Target]) -> Result<Vec<PinDeclaration>, ForgeError> {
        let mut pins = Vec::new();
        for target in selected {
            for spec in &target.pins {
                pins.push(Self::declaration(target, spec)?);
            }
        }
        Ok(pins)
    }

    /// Move `upstream`'s checkout to the pinned commit
    ///
    /// When HEAD already matches, nothing is fetched.
    #[instrument(skip_all, fields(upstream = %pin.upstream_target, commit = %pin.expected_commit.short()))]
    pub async fn resolve(
        &self,
        pin: &PinDeclaration,
        upstream: &Target,
    ) -> Result<SyncResult, ForgeError> {
        let repo = &upstream.source_path;
        let expected = &pin.expected_commit;
        let previous = self.vcs.head(repo).await?;

        if previous == *expected {
            info!("upstream already at pinned commit");
            return Ok(SyncResult {
                upstream_target: pin.upstream_target.clone(),
                previous_commit: previous.clone(),
                resolved_commit: previous,
                changed: false,
            });
        }

        info!(from = %previous.short(), "moving upstream to pinned commit");

        if let Err(e) = self.vcs.fetch(repo, expected).await {
            if !self.vcs.contains(repo, expected).await.unwrap_or(false) {
                return Err(ForgeError::CommitNotFound {
                    upstream: pin.upstream_target.clone(),
                    commit: expected.to_string(),
                    detail: format!("fetch failed: {:#}", e),
                });
            }
            warn!(error = %e, "fetch failed, but the pinned commit is already present locally");
        }

        if !self.vcs.contains(repo, expected).await? {
            return Err(ForgeError::CommitNotFound {
                upstream: pin.upstream_target.clone(),
                commit: expected.to_string(),
                detail: format!(
                    "not reachable from the remote of {}; the pin in '{}' may be stale",
                    repo.display(),
                    pin.downstream_target
                ),
            });
        }

        let checkout_error = self.vcs.checkout(repo, expected).await.err();
        let actual = self.vcs.head(repo).await?;

        if actual != *expected || checkout_error.is_some() {
            return Err(ForgeError::Verification {
                upstream: pin.upstream_target.clone(),
                expected: expected.to_string(),
                actual: actual.to_string(),
                detail: checkout_error.map(|e| format!("{:#}", e)),
            });
        }

        info!(to = %actual.short(), "upstream synchronized");
        Ok(SyncResult {
            upstream_target: pin.upstream_target.clone(),
            previous_commit: previous,
            resolved_commit: actual,
            changed: true,
        })
    }

    /// Resolve every pin declared by the selected targets
    pub async fn sync(
        &self,
        manifest: &Manifest,
        selected: &[Target],
    ) -> Result<Vec<SyncResult>, ForgeError> {
        let mut results = Vec::new();
        for pin in Self::declarations(selected)? {
            let upstream = manifest.get(&pin.upstream_target)?;
            results.push(self.resolve(&pin, upstream).await?);
        }
        Ok(results)
    }
}
