//! Artifact ledger for a single pipeline run.
//!
//! Every file or directory a run creates is registered here before the
//! stage that writes it starts. On abort the ledger deletes everything still
//! pending or ready, newest first, so cleanup never needs to guess at file
//! names by pattern.

use crate::replace::remove_path;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which stage produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStage {
    /// The downloaded submission
    Source,
    /// Working copy, rescaled in place
    Prepared,
    /// One band of the sliced clip (1-based)
    SlicedPart(u32),
    /// Per-run directory collecting the loop images
    LoopDir,
    /// One rendered loop image (1-based)
    RenderedLoop(u32),
    Archive,
}

impl std::fmt::Display for ArtifactStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactStage::Source => write!(f, "source"),
            ArtifactStage::Prepared => write!(f, "prepared"),
            ArtifactStage::SlicedPart(i) => write!(f, "sliced_part{}", i),
            ArtifactStage::LoopDir => write!(f, "loop_dir"),
            ArtifactStage::RenderedLoop(i) => write!(f, "rendered_loop{}", i),
            ArtifactStage::Archive => write!(f, "archive"),
        }
    }
}

/// Lifecycle of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Registered, the producing stage has not finished
    Pending,
    /// Fully written
    Ready,
    /// Ownership of the path passed to something else (a rename, the archiver)
    Consumed,
    Deleted,
}

impl ArtifactState {
    /// Pending and ready artifacts are removed on abort
    pub fn is_live(&self) -> bool {
        matches!(self, ArtifactState::Pending | ArtifactState::Ready)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineArtifact {
    pub path: PathBuf,
    pub stage: ArtifactStage,
    pub state: ArtifactState,
}

impl PipelineArtifact {
    pub fn ready(path: PathBuf, stage: ArtifactStage) -> Self {
        Self {
            path,
            stage,
            state: ArtifactState::Ready,
        }
    }
}

/// Handle to an artifact in a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId(usize);

/// Outcome of an abort sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Ordered record of everything a run has created
#[derive(Debug, Default)]
pub struct ArtifactLedger {
    artifacts: Vec<PipelineArtifact>,
}

impl ArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a path a stage is about to write
    pub fn register(&mut self, path: impl Into<PathBuf>, stage: ArtifactStage) -> ArtifactId {
        self.push(path.into(), stage, ArtifactState::Pending)
    }

    /// Record a path that already exists and now belongs to the run
    pub fn adopt(&mut self, path: impl Into<PathBuf>, stage: ArtifactStage) -> ArtifactId {
        self.push(path.into(), stage, ArtifactState::Ready)
    }

    fn push(&mut self, path: PathBuf, stage: ArtifactStage, state: ArtifactState) -> ArtifactId {
        debug!(path = %path.display(), %stage, "artifact registered");
        self.artifacts.push(PipelineArtifact { path, stage, state });
        ArtifactId(self.artifacts.len() - 1)
    }

    pub fn get(&self, id: ArtifactId) -> &PipelineArtifact {
        &self.artifacts[id.0]
    }

    pub fn path(&self, id: ArtifactId) -> &Path {
        &self.artifacts[id.0].path
    }

    pub fn mark_ready(&mut self, id: ArtifactId) {
        self.artifacts[id.0].state = ArtifactState::Ready;
    }

    /// The path is now owned elsewhere; abort leaves it alone
    pub fn consume(&mut self, id: ArtifactId) {
        self.artifacts[id.0].state = ArtifactState::Consumed;
    }

    /// The artifact was moved; later cleanup targets `path`
    pub fn relocate(&mut self, id: ArtifactId, path: impl Into<PathBuf>) {
        self.artifacts[id.0].path = path.into();
    }

    /// Delete an artifact whose consumers are done.
    ///
    /// A failed deletion is logged and leaves the artifact live, so a later
    /// abort tries again.
    pub fn release(&mut self, id: ArtifactId) -> bool {
        let artifact = &mut self.artifacts[id.0];
        match remove_path(&artifact.path) {
            Ok(()) => {
                debug!(path = %artifact.path.display(), stage = %artifact.stage, "artifact released");
                artifact.state = ArtifactState::Deleted;
                true
            }
            Err(e) => {
                warn!(path = %artifact.path.display(), stage = %artifact.stage, error = %e, "failed to release artifact");
                false
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipelineArtifact> {
        self.artifacts.iter()
    }

    pub fn live(&self) -> impl Iterator<Item = &PipelineArtifact> {
        self.artifacts.iter().filter(|a| a.state.is_live())
    }

    /// Delete every live artifact, newest first.
    ///
    /// Each deletion is attempted independently; failures are logged and
    /// reported, never raised.
    pub fn abort(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for artifact in self.artifacts.iter_mut().rev() {
            if !artifact.state.is_live() {
                continue;
            }
            match remove_path(&artifact.path) {
                Ok(()) => {
                    debug!(path = %artifact.path.display(), stage = %artifact.stage, "removed during cleanup");
                    artifact.state = ArtifactState::Deleted;
                    report.removed.push(artifact.path.clone());
                }
                Err(e) => {
                    warn!(path = %artifact.path.display(), stage = %artifact.stage, error = %e, "cleanup could not remove artifact");
                    report.failed.push(artifact.path.clone());
                }
            }
        }

        report
    }
}
