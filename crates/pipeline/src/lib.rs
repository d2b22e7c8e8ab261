//! Showcase slicer
//!
//! Turns one uploaded clip into a set of looping images, one per column of a
//! storefront showcase, and delivers them as a single archive.

pub mod archive;
pub mod artifact;
pub mod encode;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod probe;
pub mod replace;
pub mod runner;
pub mod service;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use showcase_slicer_config as config;
pub use showcase_slicer_config::Config;

pub use archive::{archive, archive_path_for, ARCHIVE_EXTENSION};
pub use artifact::{
    ArtifactId, ArtifactLedger, ArtifactStage, ArtifactState, CleanupReport, PipelineArtifact,
};
pub use encode::{
    band_layout, expected_rescale, patch_terminator, prepare_copy, render, rescale, rescale_in_place, slice,
    Band, MediaTools, PatchOutcome, SliceSet, SlicedPart, WidthPolicy,
};
pub use error::{FailureKind, PipelineError};
pub use notify::{failure_message, success_caption, Notifier, NotifyError};
pub use orchestrator::{Orchestrator, RunContext, RunOutcome, RunState, SourceMedia, WorkingArea};
pub use probe::{probe, MediaGeometry};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use service::{ServiceSummary, ShowcaseService, Submission};
pub use tools::{ToolLocator, Toolchain};
