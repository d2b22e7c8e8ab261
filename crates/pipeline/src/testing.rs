//! Scripted collaborators for tests.
//!
//! [`FakeRunner`] stands in for ffmpeg and ffprobe. Fake "videos" are text
//! files holding `FAKEVIDEO <w>x<h>`; the runner reads that header to answer
//! probes and writes the geometry each filter would produce, so renames and
//! in-place replacement behave exactly as with real files.

use crate::encode::expected_rescale;
use crate::notify::{Notifier, NotifyError};
use crate::probe::MediaGeometry;
use crate::runner::{CommandOutput, CommandRunner};
use crate::tools::Toolchain;
use async_trait::async_trait;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const FAKE_VIDEO_HEADER: &str = "FAKEVIDEO";

pub fn fake_toolchain() -> Toolchain {
    Toolchain {
        ffmpeg: Some(PathBuf::from("/fake/bin/ffmpeg")),
        ffprobe: Some(PathBuf::from("/fake/bin/ffprobe")),
    }
}

pub fn write_fake_video(path: &Path, geometry: MediaGeometry) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, format!("{} {}", FAKE_VIDEO_HEADER, geometry)).unwrap();
}

fn read_fake_geometry(path: &Path) -> io::Result<Option<MediaGeometry>> {
    let content = fs::read(path)?;
    let text = String::from_utf8_lossy(&content);
    let geometry = text
        .strip_prefix(FAKE_VIDEO_HEADER)
        .and_then(|rest| rest.trim().split_once('x'))
        .and_then(|(w, h)| Some(MediaGeometry::new(w.parse().ok()?, h.parse().ok()?)));
    Ok(geometry)
}

pub fn args_of(args: &[OsString]) -> Vec<String> {
    args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
}

pub fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
    args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|pair| pair[0] == flag)
        .map(|pair| pair[1].as_str())
}

fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        status: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn succeeded(stdout: String) -> CommandOutput {
    CommandOutput {
        status: Some(0),
        stdout,
        stderr: String::new(),
    }
}

/// Scripted stand-in for ffmpeg/ffprobe
pub struct FakeRunner {
    canonical_width: u32,
    fail_pattern: Option<String>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            canonical_width: 750,
            fail_pattern: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail any encoder call with an argument containing `pattern`
    pub fn fail_when(mut self, pattern: &str) -> Self {
        self.fail_pattern = Some(pattern.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn encoder_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|argv| argv[0].ends_with("ffmpeg"))
            .count()
    }

    fn probe(&self, args: &[String]) -> io::Result<CommandOutput> {
        let path = Path::new(args.last().map(String::as_str).unwrap_or_default());
        let geometry = match read_fake_geometry(path) {
            Ok(geometry) => geometry,
            Err(e) => return Ok(failed(&format!("{}: {}", path.display(), e))),
        };
        let stdout = match geometry {
            Some(g) => format!(r#"{{"streams": [{{"width": {}, "height": {}}}]}}"#, g.width, g.height),
            None => r#"{"streams": []}"#.to_string(),
        };
        Ok(succeeded(stdout))
    }

    fn encode(&self, args: &[String]) -> io::Result<CommandOutput> {
        if let Some(pattern) = &self.fail_pattern {
            if args.iter().any(|a| a.contains(pattern.as_str())) {
                return Ok(failed("scripted failure"));
            }
        }

        let (Some(input), Some(filter), Some(output)) =
            (value_after(args, "-i"), value_after(args, "-vf"), args.last())
        else {
            return Ok(failed("malformed command"));
        };

        let source = match read_fake_geometry(Path::new(input)) {
            Ok(Some(g)) => g,
            Ok(None) => return Ok(failed("Invalid data found when processing input")),
            Err(e) => return Ok(failed(&e.to_string())),
        };

        if filter.contains("palettegen") {
            let mut bytes = b"GIF89a".to_vec();
            bytes.extend_from_slice(source.to_string().as_bytes());
            bytes.push(0x3B);
            fs::write(output, bytes)?;
            return Ok(succeeded(String::new()));
        }

        let geometry = if filter.starts_with("scale=") {
            expected_rescale(source, self.canonical_width)
        } else if let Some(crop) = filter.strip_prefix("crop=") {
            let width = crop
                .split(':')
                .next()
                .and_then(|w| w.parse().ok())
                .unwrap_or(source.width);
            MediaGeometry::new(width, source.height)
        } else {
            source
        };

        write_fake_video(Path::new(output), geometry);
        Ok(succeeded(String::new()))
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, argv: &[OsString]) -> io::Result<CommandOutput> {
        let argv = args_of(argv);
        self.calls.lock().unwrap().push(argv.clone());

        let (program, args) = argv.split_first().expect("argv has a program");
        if program.ends_with("ffprobe") {
            self.probe(args)
        } else {
            self.encode(args)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Text(String),
    Attachment { path: PathBuf, caption: String },
}

/// Collects every notification a run sends
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Notification::Text(text.to_string()));
        Ok(())
    }

    async fn notify_with_attachment(&self, path: &Path, caption: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Notification::Attachment {
            path: path.to_path_buf(),
            caption: caption.to_string(),
        });
        Ok(())
    }
}
