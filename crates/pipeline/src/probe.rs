//! Probe module for reading clip geometry with ffprobe.
//!
//! Only the first video stream is consulted.

use crate::encode::MediaTools;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::Path;

/// Frame size of a clip's primary video stream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaGeometry {
    pub width: u32,
    pub height: u32,
}

impl MediaGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for MediaGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub width: Option<u32>,
        pub height: Option<u32>,
    }
}

/// Arguments for `ffprobe` selecting the first video stream's width and height as JSON
pub fn build_probe_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height",
        "-of",
        "json",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_owned());
    args
}

/// Probes `path` and returns the geometry of its first video stream.
pub fn probe(tools: &MediaTools, path: &Path) -> Result<MediaGeometry, PipelineError> {
    let output = tools.run_ffprobe(build_probe_args(path))?;
    parse_geometry(&output.stdout)
}

/// Parses ffprobe JSON output into a MediaGeometry.
pub fn parse_geometry(json_str: &str) -> Result<MediaGeometry, PipelineError> {
    let ffprobe: ffprobe_json::FfprobeOutput = serde_json::from_str(json_str)
        .map_err(|e| PipelineError::Probe(format!("Failed to parse ffprobe output: {}", e)))?;

    let stream = ffprobe
        .streams
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::Probe("no video stream".to_string()))?;

    match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Ok(MediaGeometry { width, height }),
        (width, height) => Err(PipelineError::Probe(format!(
            "video stream has no usable size (width {:?}, height {:?})",
            width, height
        ))),
    }
}
