//! External tool resolution
//!
//! Locates the encoder (`ffmpeg`) and the probe tool (`ffprobe`):
//! an explicit config path wins, then the tool's environment override
//! (`FFMPEG_BIN` / `FFPROBE_BIN`), then a PATH lookup. A missing tool is
//! not fatal at startup; stages that need it fail with `ToolUnavailable`.

use crate::config::ToolsConfig;
use crate::error::PipelineError;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const FFMPEG: &str = "ffmpeg";
pub const FFMPEG_ENV: &str = "FFMPEG_BIN";
pub const FFPROBE: &str = "ffprobe";
pub const FFPROBE_ENV: &str = "FFPROBE_BIN";

/// Memoized executable lookup, one entry per tool name
#[derive(Debug, Default)]
pub struct ToolLocator {
    cache: Mutex<HashMap<String, Option<PathBuf>>>,
}

impl ToolLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide locator
    pub fn global() -> &'static ToolLocator {
        static GLOBAL: OnceLock<ToolLocator> = OnceLock::new();
        GLOBAL.get_or_init(ToolLocator::new)
    }

    /// Resolve `tool_name`, honoring the `env_override` variable first.
    ///
    /// The first answer for a tool name is cached for the locator's lifetime,
    /// including a negative one.
    pub fn locate(&self, tool_name: &str, env_override: &str) -> Option<PathBuf> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(found) = cache.get(tool_name) {
            return found.clone();
        }

        let found = lookup(tool_name, env_override);
        cache.insert(tool_name.to_string(), found.clone());
        found
    }
}

fn lookup(tool_name: &str, env_override: &str) -> Option<PathBuf> {
    if let Some(value) = env::var_os(env_override) {
        if !value.is_empty() {
            return Some(PathBuf::from(value));
        }
    }
    which::which(tool_name).ok()
}

/// Resolved tool paths, passed explicitly to every stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toolchain {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
}

impl Toolchain {
    pub fn resolve(tools: &ToolsConfig, locator: &ToolLocator) -> Self {
        Self {
            ffmpeg: tools
                .ffmpeg
                .clone()
                .or_else(|| locator.locate(FFMPEG, FFMPEG_ENV)),
            ffprobe: tools
                .ffprobe
                .clone()
                .or_else(|| locator.locate(FFPROBE, FFPROBE_ENV)),
        }
    }

    pub fn ffmpeg(&self) -> Result<&Path, PipelineError> {
        self.ffmpeg.as_deref().ok_or(PipelineError::ToolUnavailable {
            tool: FFMPEG,
            env_var: FFMPEG_ENV,
        })
    }

    pub fn ffprobe(&self) -> Result<&Path, PipelineError> {
        self.ffprobe.as_deref().ok_or(PipelineError::ToolUnavailable {
            tool: FFPROBE,
            env_var: FFPROBE_ENV,
        })
    }

    /// Fails on the first missing tool, encoder first
    pub fn check(&self) -> Result<(), PipelineError> {
        self.ffmpeg()?;
        self.ffprobe()?;
        Ok(())
    }

    pub fn report(&self) -> Vec<(&'static str, Option<&Path>)> {
        vec![
            (FFMPEG, self.ffmpeg.as_deref()),
            (FFPROBE, self.ffprobe.as_deref()),
        ]
    }
}
