//! Slice stage
//!
//! Cuts a canonical-width clip into equal vertical bands. Band 1 ends up in
//! place of the input file; the other bands are written next to it as
//! `<stem>_part<i>.<ext>`.

use super::{video_codec_args, MediaTools};
use crate::artifact::{ArtifactId, ArtifactLedger, ArtifactStage};
use crate::error::PipelineError;
use crate::probe::probe;
use crate::replace::{replace_file, sibling_path};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;

/// One vertical band of the frame, left edge at `x`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    /// 1-based position from the left
    pub index: u32,
    pub x: u32,
    pub width: u32,
}

impl Band {
    /// Exclusive right edge
    pub fn end(&self) -> u32 {
        self.x + self.width
    }

    pub fn crop_filter(&self) -> String {
        format!("crop={}:ih:{}:0", self.width, self.x)
    }
}

/// A band written to disk and tracked in the run's ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicedPart {
    pub band: Band,
    pub path: PathBuf,
    pub artifact: ArtifactId,
}

/// All bands of one clip, ordered left to right
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceSet {
    pub parts: Vec<SlicedPart>,
}

/// Split `frame_width` into `parts` contiguous bands of equal width.
///
/// Fails with `Geometry` when the width does not divide evenly.
pub fn band_layout(frame_width: u32, parts: u32) -> Result<Vec<Band>, PipelineError> {
    if parts == 0 || frame_width == 0 || frame_width % parts != 0 {
        let parts = parts.max(1);
        return Err(PipelineError::Geometry {
            expected: frame_width - frame_width % parts,
            actual: frame_width,
        });
    }

    let width = frame_width / parts;
    Ok((0..parts)
        .map(|i| Band {
            index: i + 1,
            x: i * width,
            width,
        })
        .collect())
}

/// Output path for band `index` of `source`
pub fn band_output_path(source: &Path, index: u32) -> PathBuf {
    sibling_path(source, &format!("part{}", index))
}

/// Build the encoder arguments cropping `band` out of `input`
pub fn build_crop_args(input: &Path, output: &Path, band: &Band, tools: &MediaTools) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.as_os_str().to_owned()];
    args.push("-vf".into());
    args.push(band.crop_filter().into());
    args.extend(video_codec_args(tools.settings()));
    args.push(output.as_os_str().to_owned());
    args
}

/// Slice the clip at `path` into bands.
///
/// Every output path is registered in `ledger` before its encode starts, so
/// the caller can remove partial output if any band fails. The slicer itself
/// does not roll back.
pub fn slice(tools: &MediaTools, path: &Path, ledger: &mut ArtifactLedger) -> Result<SliceSet, PipelineError> {
    let settings = tools.settings();
    let geometry = probe(tools, path)?;
    if geometry.width != settings.canonical_width {
        return Err(PipelineError::Geometry {
            expected: settings.canonical_width,
            actual: geometry.width,
        });
    }

    let layout = band_layout(settings.canonical_width, settings.parts)?;
    let mut parts = Vec::with_capacity(layout.len());

    // Band 1 goes to a sibling first; the input must stay intact until every crop has read it.
    for band in layout {
        let output = band_output_path(path, band.index);
        let artifact = ledger.register(&output, ArtifactStage::SlicedPart(band.index));

        tools.run_ffmpeg(
            build_crop_args(path, &output, &band, tools),
            &format!("slice band {}", band.index),
        )?;
        ledger.mark_ready(artifact);

        parts.push(SlicedPart {
            band,
            path: output,
            artifact,
        });
    }

    if let Some(first) = parts.first_mut() {
        replace_file(&first.path, path)?;
        ledger.relocate(first.artifact, path);
        first.path = path.to_path_buf();
    }

    info!(path = %path.display(), parts = parts.len(), band_width = settings.band_width(), "sliced");
    Ok(SliceSet { parts })
}
