//! The removal set: every temporary file a run creates.
//!
//! A stage [`reserve`](ArtifactSet::reserve)s the path it is about to write
//! before it starts, so a file that is only half written when the run is
//! dropped is still removed. Once the file exists the stage confirms it with
//! [`ArtifactSet::register`]; a reservation that never materialised is
//! dropped with [`ArtifactSet::release`]. [`ArtifactSet::cleanup`] is the
//! run's terminal step and removes everything concurrently.
//!
//! Removal is best-effort and idempotent: a file that is already gone is not
//! an error, and a file that cannot be removed produces a
//! [`CleanupWarning`] without stopping the rest of the cleanup.
//!
//! If the set is dropped with entries still registered (the run future was
//! dropped, or a stage panicked) the remaining files are removed
//! synchronously in `Drop`.

use crate::error::CleanupWarning;
use futures::future::join_all;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which stage created an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStage {
    /// Raw bytes written by the fetcher.
    Download,
    /// Resized image written by the normaliser.
    Derivative,
}

/// A temporary file owned by the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    /// Position in creation order, starting at 0.
    pub order: usize,
    pub stage: ArtifactStage,
}

/// Ordered, duplicate-free set of artifacts awaiting removal.
#[derive(Debug, Default)]
pub struct ArtifactSet {
    artifacts: Vec<Artifact>,
    /// Paths a stage may be writing right now. Not counted as created.
    reserved: Vec<PathBuf>,
    created: usize,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` for removal before a stage starts writing it.
    pub fn reserve(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.contains(&path) && !self.reserved.contains(&path) {
            self.reserved.push(path);
        }
    }

    /// Forget a reservation whose file was never created.
    pub fn release(&mut self, path: &Path) {
        self.reserved.retain(|p| p != path);
    }

    pub fn is_reserved(&self, path: &Path) -> bool {
        self.reserved.iter().any(|p| p == path)
    }

    /// Record `path` for removal. Returns `false` if it was already recorded.
    ///
    /// A matching reservation is converted into a created artifact.
    pub fn register(&mut self, path: impl Into<PathBuf>, stage: ArtifactStage) -> bool {
        let path = path.into();
        if self.contains(&path) {
            return false;
        }
        self.release(&path);
        debug!("Registered {:?} artifact {}", stage, path.display());
        self.artifacts.push(Artifact {
            path,
            order: self.created,
            stage,
        });
        self.created += 1;
        true
    }

    /// Move every artifact of `other` into this set, keeping their order.
    pub fn absorb(&mut self, mut other: ArtifactSet) {
        for artifact in std::mem::take(&mut other.artifacts) {
            self.register(artifact.path, artifact.stage);
        }
        for path in std::mem::take(&mut other.reserved) {
            self.reserve(path);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.artifacts.iter().any(|a| a.path == path)
    }

    /// Artifacts currently awaiting removal, in creation order.
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.reserved.is_empty()
    }

    /// Total number of artifacts ever registered, including removed ones.
    pub fn created(&self) -> usize {
        self.created
    }

    /// Remove every registered artifact and empty the set.
    ///
    /// Never fails; undeletable files come back as warnings.
    pub async fn cleanup(&mut self) -> Vec<CleanupWarning> {
        let mut pending: Vec<PathBuf> = std::mem::take(&mut self.artifacts)
            .into_iter()
            .map(|a| a.path)
            .collect();
        pending.append(&mut self.reserved);
        if pending.is_empty() {
            return Vec::new();
        }
        debug!("Cleaning up {} artifacts", pending.len());

        let results = join_all(pending.into_iter().map(|path| async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => None,
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => Some(CleanupWarning {
                    path,
                    reason: e.to_string(),
                }),
            }
        }))
        .await;

        let warnings: Vec<CleanupWarning> = results.into_iter().flatten().collect();
        for w in &warnings {
            warn!("{}", w);
        }
        warnings
    }
}

impl Drop for ArtifactSet {
    fn drop(&mut self) {
        if self.is_empty() {
            return;
        }
        warn!(
            "Artifact set dropped before cleanup; removing {} files",
            self.artifacts.len() + self.reserved.len()
        );
        let paths = self
            .artifacts
            .drain(..)
            .map(|a| a.path)
            .chain(self.reserved.drain(..));
        for path in paths {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Could not remove {}: {}", path.display(), e);
                }
            }
        }
    }
}
