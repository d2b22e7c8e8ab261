//! Error types shared by every pipeline stage

use thiserror::Error;

/// Longest stretch of tool diagnostics kept in an error
const DIAGNOSTIC_TAIL_CHARS: usize = 2000;

/// Error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required external executable could not be located or started
    #[error("{tool} not found: install it and add it to PATH or set {env_var}")]
    ToolUnavailable {
        tool: &'static str,
        env_var: &'static str,
    },

    /// The probe tool failed or its output was not a usable geometry record
    #[error("Probe failed: {0}")]
    Probe(String),

    /// The encode tool exited with a failure status
    #[error("{operation} failed with {}: {stderr}", status_label(.status))]
    Encode {
        operation: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The rendered images could not be bundled
    #[error("Archive failed: {0}")]
    Archive(String),

    /// A clip had the wrong width for the requested stage
    #[error("Expected a frame {expected} wide, found {actual}")]
    Geometry { expected: u32, actual: u32 },

    /// The submission is not a container the pipeline can process
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// IO error in the working area
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stage panicked; the run was cleaned up like any other failure
    #[error("Stage panicked: {0}")]
    Panicked(String),
}

/// Submitter-facing classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    UnsupportedFormat,
    ToolUnavailable,
    Processing,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UnsupportedFormat => "unsupported_format",
            FailureKind::ToolUnavailable => "tool_unavailable",
            FailureKind::Processing => "processing",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::ToolUnavailable { .. } => FailureKind::ToolUnavailable,
            PipelineError::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            PipelineError::Probe(_)
            | PipelineError::Encode { .. }
            | PipelineError::Archive(_)
            | PipelineError::Geometry { .. }
            | PipelineError::Io(_)
            | PipelineError::Panicked(_) => FailureKind::Processing,
        }
    }
}

fn status_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "termination by signal".to_string(),
    }
}

/// Keeps the end of a tool's stderr, where ffmpeg prints the actual failure.
pub(crate) fn diagnostic_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= DIAGNOSTIC_TAIL_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - DIAGNOSTIC_TAIL_CHARS).collect();
    format!("...{}", tail)
}
