//! Render stage
//!
//! Turns one band into a looping palette GIF: frames are sampled at a fixed
//! rate, a palette is generated from them, and the frames are re-quantized
//! against that palette.
//!
//! After a successful render the file's final byte is patched. GIF streams
//! end with the trailer `0x3B`; the storefront that consumes these images
//! expects `0x21` in that position instead.

use super::MediaTools;
use crate::error::PipelineError;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Standard GIF end-of-stream marker
pub const GIF_TRAILER: u8 = 0x3B;
/// Byte written over the trailer
pub const PATCHED_TRAILER: u8 = 0x21;

/// Output width of a rendered loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthPolicy {
    /// Keep the band's own width
    Keep,
    Fixed(u32),
}

impl From<Option<u32>> for WidthPolicy {
    fn from(width: Option<u32>) -> Self {
        match width {
            Some(w) => WidthPolicy::Fixed(w),
            None => WidthPolicy::Keep,
        }
    }
}

/// Result of [`patch_terminator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched,
    Unchanged,
}

/// Two-pass palette filter graph
pub fn loop_filter(frame_rate: u32, width: WidthPolicy) -> String {
    let scale = match width {
        WidthPolicy::Keep => String::new(),
        WidthPolicy::Fixed(w) => format!(",scale={}:-1:flags=lanczos", w),
    };
    format!(
        "fps={}{},split[s0][s1];[s0]palettegen=stats_mode=full[p];[s1][p]paletteuse=dither=sierra2_4a",
        frame_rate, scale
    )
}

/// Build the encoder arguments rendering `input` into a looping GIF at `output`
pub fn build_render_args(input: &Path, output: &Path, frame_rate: u32, width: WidthPolicy) -> Vec<OsString> {
    vec![
        "-y".into(),
        "-i".into(),
        input.as_os_str().to_owned(),
        "-vf".into(),
        loop_filter(frame_rate, width).into(),
        "-an".into(),
        "-loop".into(),
        "0".into(),
        output.as_os_str().to_owned(),
    ]
}

/// Render `input_clip` into `output_image`, then patch its trailer.
///
/// Patch failures are logged and never fail the render.
pub fn render(
    tools: &MediaTools,
    input_clip: &Path,
    output_image: &Path,
    frame_rate: u32,
    width: WidthPolicy,
) -> Result<(), PipelineError> {
    let operation = format!(
        "render {}",
        output_image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    tools.run_ffmpeg(build_render_args(input_clip, output_image, frame_rate, width), &operation)?;

    match patch_terminator(output_image) {
        Ok(outcome) => debug!(path = %output_image.display(), ?outcome, "terminator checked"),
        Err(e) => warn!(path = %output_image.display(), error = %e, "could not patch terminator byte"),
    }

    info!(path = %output_image.display(), "rendered loop image");
    Ok(())
}

/// Overwrite a trailing `0x3B` with `0x21` in place.
///
/// The file length never changes. Empty files and files with any other final
/// byte are left alone, so a second call is always `Unchanged`.
pub fn patch_terminator(path: &Path) -> io::Result<PatchOutcome> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(PatchOutcome::Unchanged);
    }

    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != GIF_TRAILER {
        return Ok(PatchOutcome::Unchanged);
    }

    file.seek(SeekFrom::End(-1))?;
    file.write_all(&[PATCHED_TRAILER])?;
    file.flush()?;
    Ok(PatchOutcome::Patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodeConfig;
    use crate::probe::MediaGeometry;
    use crate::testing::{args_of, fake_toolchain, has_flag_with_value, write_fake_video, FakeRunner};
    use proptest::prelude::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_patch_is_idempotent_and_keeps_length(body in proptest::collection::vec(any::<u8>(), 0..512)) {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("part1.gif");
            fs::write(&path, &body).unwrap();

            patch_terminator(&path).unwrap();
            let once = fs::read(&path).unwrap();
            let second = patch_terminator(&path).unwrap();
            let twice = fs::read(&path).unwrap();

            prop_assert_eq!(second, PatchOutcome::Unchanged);
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(once.len(), body.len());
            if let Some(&last) = body.last() {
                let expected = if last == GIF_TRAILER { PATCHED_TRAILER } else { last };
                prop_assert_eq!(once[once.len() - 1], expected);
                prop_assert_eq!(&once[..once.len() - 1], &body[..body.len() - 1]);
            }
        }
    }

    #[test]
    fn test_patch_rewrites_trailer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("part1.gif");
        fs::write(&path, b"GIF89a\x01\x02;").unwrap();

        assert_eq!(patch_terminator(&path).unwrap(), PatchOutcome::Patched);
        assert_eq!(fs::read(&path).unwrap(), b"GIF89a\x01\x02!");
    }

    #[test]
    fn test_patch_empty_file_is_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.gif");
        fs::write(&path, b"").unwrap();

        assert_eq!(patch_terminator(&path).unwrap(), PatchOutcome::Unchanged);
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_patch_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(patch_terminator(&dir.path().join("missing.gif")).is_err());
    }

    #[test]
    fn test_loop_filter_variants() {
        assert_eq!(
            loop_filter(15, WidthPolicy::Keep),
            "fps=15,split[s0][s1];[s0]palettegen=stats_mode=full[p];[s1][p]paletteuse=dither=sierra2_4a"
        );
        assert!(loop_filter(10, WidthPolicy::Fixed(120)).starts_with("fps=10,scale=120:-1:flags=lanczos,split"));
        assert_eq!(WidthPolicy::from(None), WidthPolicy::Keep);
        assert_eq!(WidthPolicy::from(Some(300)), WidthPolicy::Fixed(300));
    }

    #[test]
    fn test_render_args() {
        let args = args_of(&build_render_args(Path::new("band.mp4"), Path::new("part1.gif"), 15, WidthPolicy::Keep));
        assert_eq!(args[0], "-y");
        assert!(has_flag_with_value(&args, "-i", "band.mp4"));
        assert!(has_flag_with_value(&args, "-loop", "0"));
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("part1.gif"));
    }

    #[test]
    fn test_render_patches_output() {
        let dir = TempDir::new().unwrap();
        let band = dir.path().join("band.mp4");
        write_fake_video(&band, MediaGeometry::new(150, 500));
        let output = dir.path().join("part1.gif");
        let tools = MediaTools::new(fake_toolchain(), Arc::new(FakeRunner::new()), EncodeConfig::default());

        render(&tools, &band, &output, 15, WidthPolicy::Keep).unwrap();

        let bytes = fs::read(&output).unwrap();
        assert!(bytes.starts_with(b"GIF89a"));
        assert_eq!(bytes.last(), Some(&PATCHED_TRAILER));
    }

    #[test]
    fn test_render_failure_is_encode_error() {
        let dir = TempDir::new().unwrap();
        let band = dir.path().join("band.mp4");
        write_fake_video(&band, MediaGeometry::new(150, 500));
        let tools = MediaTools::new(
            fake_toolchain(),
            Arc::new(FakeRunner::new().fail_when("palettegen")),
            EncodeConfig::default(),
        );

        let err = render(&tools, &band, &dir.path().join("part1.gif"), 15, WidthPolicy::Keep).unwrap_err();
        assert!(matches!(err, PipelineError::Encode { status: Some(1), .. }));
    }
}
