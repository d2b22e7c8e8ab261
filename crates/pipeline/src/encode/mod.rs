//! Encode-tool stages for the showcase pipeline
//!
//! [`MediaTools`] bundles the resolved toolchain, the command runner and the
//! encode settings; every stage function takes it by reference.

pub mod render;
pub mod rescale;
pub mod slice;

pub use render::{
    build_render_args, loop_filter, patch_terminator, render, PatchOutcome, WidthPolicy,
};
pub use rescale::{
    build_rescale_args, copy_source, expected_rescale, is_video_container, prepare_copy,
    rescale, rescale_in_place, scale_filter, VIDEO_EXTENSIONS,
};
pub use slice::{band_layout, band_output_path, build_crop_args, slice, Band, SlicedPart, SliceSet};

use crate::config::EncodeConfig;
use crate::error::{diagnostic_tail, PipelineError};
use crate::runner::{display_argv, CommandOutput, CommandRunner};
use crate::tools::{Toolchain, FFMPEG, FFMPEG_ENV, FFPROBE, FFPROBE_ENV};
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Toolchain, runner and encode settings shared by all stages of a run
#[derive(Clone)]
pub struct MediaTools {
    toolchain: Toolchain,
    runner: Arc<dyn CommandRunner>,
    settings: EncodeConfig,
}

impl MediaTools {
    pub fn new(toolchain: Toolchain, runner: Arc<dyn CommandRunner>, settings: EncodeConfig) -> Self {
        Self {
            toolchain,
            runner,
            settings,
        }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn settings(&self) -> &EncodeConfig {
        &self.settings
    }

    /// Run the encoder with `args`; a non-zero exit becomes `Encode` for `operation`.
    pub fn run_ffmpeg(&self, args: Vec<OsString>, operation: &str) -> Result<CommandOutput, PipelineError> {
        let program = self.toolchain.ffmpeg()?;
        let output = self.spawn(program, args).map_err(|e| spawn_error(e, FFMPEG, FFMPEG_ENV))?;

        if output.success() {
            Ok(output)
        } else {
            Err(PipelineError::Encode {
                operation: operation.to_string(),
                status: output.status,
                stderr: diagnostic_tail(&output.stderr),
            })
        }
    }

    /// Run the probe tool with `args`; a non-zero exit becomes `Probe`.
    pub fn run_ffprobe(&self, args: Vec<OsString>) -> Result<CommandOutput, PipelineError> {
        let program = self.toolchain.ffprobe()?;
        let output = self.spawn(program, args).map_err(|e| spawn_error(e, FFPROBE, FFPROBE_ENV))?;

        if output.success() {
            Ok(output)
        } else {
            Err(PipelineError::Probe(format!(
                "ffprobe exited with {:?}: {}",
                output.status,
                diagnostic_tail(&output.stderr)
            )))
        }
    }

    fn spawn(&self, program: &Path, args: Vec<OsString>) -> io::Result<CommandOutput> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(program.as_os_str().to_owned());
        argv.extend(args);

        debug!(command = %display_argv(&argv), "running external tool");
        self.runner.run(&argv)
    }
}

/// A located tool that cannot be started is as good as missing.
fn spawn_error(err: io::Error, tool: &'static str, env_var: &'static str) -> PipelineError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            warn!(tool, error = %err, "located tool could not be started");
            PipelineError::ToolUnavailable { tool, env_var }
        }
        _ => err.into(),
    }
}

/// Shared x264 video / passthrough audio flags
pub(crate) fn video_codec_args(settings: &EncodeConfig) -> Vec<OsString> {
    [
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        settings.preset.clone(),
        "-crf".to_string(),
        settings.crf.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
    ]
    .into_iter()
    .map(OsString::from)
    .collect()
}
