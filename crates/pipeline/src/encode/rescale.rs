//! Rescale stage
//!
//! Normalizes a clip to the canonical width without upscaling. Video is
//! re-encoded with x264 at a fixed CRF, audio is copied untouched.

use super::{video_codec_args, MediaTools};
use crate::artifact::{ArtifactStage, PipelineArtifact};
use crate::error::PipelineError;
use crate::probe::MediaGeometry;
use crate::replace::{remove_path, replace_file, sibling_path};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Container extensions the rescaler accepts
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv"];

pub fn is_video_container(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Scale filter: clamp width to `canonical_width`, even height keeps the aspect ratio
pub fn scale_filter(canonical_width: u32) -> String {
    format!(
        "scale='if(gt(iw,{w}),{w},iw)':-2",
        w = canonical_width
    )
}

/// Geometry [`scale_filter`] produces for a `source` clip.
///
/// Height is `width * ih / iw` rounded to the nearest even number, the same
/// rounding the encoder applies for `-2`.
pub fn expected_rescale(source: MediaGeometry, canonical_width: u32) -> MediaGeometry {
    let width = source.width.min(canonical_width);
    let numerator = u64::from(width) * u64::from(source.height);
    let iw = u64::from(source.width);
    let half = (numerator + iw) / (2 * iw);
    MediaGeometry {
        width,
        height: (half * 2) as u32,
    }
}

/// Build the encoder arguments for a rescale from `input` to `output`
pub fn build_rescale_args(input: &Path, output: &Path, canonical_width: u32, tools: &MediaTools) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.as_os_str().to_owned()];
    args.push("-vf".into());
    args.push(scale_filter(canonical_width).into());
    args.extend(video_codec_args(tools.settings()));
    args.push(output.as_os_str().to_owned());
    args
}

/// Rescale `input` into `output`
pub fn rescale(tools: &MediaTools, input: &Path, output: &Path) -> Result<(), PipelineError> {
    let canonical_width = tools.settings().canonical_width;
    tools.run_ffmpeg(build_rescale_args(input, output, canonical_width, tools), "rescale")?;
    Ok(())
}

/// Rescale `path` through a sibling temp file, replacing `path` only once the
/// encode succeeded. On failure the temp file is removed and `path` is left as it was.
pub fn rescale_in_place(tools: &MediaTools, path: &Path) -> Result<(), PipelineError> {
    let temp = sibling_path(path, &format!("{}w", tools.settings().canonical_width));

    let result = rescale(tools, path, &temp).and_then(|()| replace_file(&temp, path).map_err(PipelineError::from));

    if result.is_err() {
        if let Err(e) = remove_path(&temp) {
            warn!(path = %temp.display(), error = %e, "failed to remove rescale temp file");
        }
    } else {
        info!(path = %path.display(), "rescaled and replaced");
    }
    result
}

/// Copy `source` to `dest`, creating the destination directory
pub fn copy_source(source: &Path, dest: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, dest)?;
    info!(from = %source.display(), to = %dest.display(), "copied into working area");
    Ok(())
}

/// Copy `source` into `working_dir` under its own name and rescale the copy
/// when it is a video container. Other files come back untouched.
///
/// A failed rescale leaves the copy in place for the caller to clean up.
pub fn prepare_copy(tools: &MediaTools, source: &Path, working_dir: &Path) -> Result<PipelineArtifact, PipelineError> {
    let name = source
        .file_name()
        .ok_or_else(|| PipelineError::UnsupportedFormat(format!("{} has no file name", source.display())))?;
    let dest: PathBuf = working_dir.join(name);

    copy_source(source, &dest)?;

    if is_video_container(&dest) {
        rescale_in_place(tools, &dest)?;
    } else {
        info!(path = %dest.display(), "not a video container, skipping rescale");
    }

    Ok(PipelineArtifact::ready(dest, ArtifactStage::Prepared))
}
