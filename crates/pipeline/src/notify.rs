//! Notifier seam
//!
//! The chat layer hands every run a [`Notifier`]; the pipeline reports its
//! terminal outcome through it and nothing else.

use crate::config::Language;
use crate::error::FailureKind;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Delivery of a message to the submitter failed
#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), NotifyError>;

    async fn notify_with_attachment(&self, path: &Path, caption: &str) -> Result<(), NotifyError>;
}

/// Submitter-facing failure text. Never includes paths or tool output.
pub fn failure_message(kind: FailureKind, language: Language) -> &'static str {
    match (kind, language) {
        (FailureKind::UnsupportedFormat, Language::En) => {
            "Unsupported format. Please send a video clip (mp4, m4v, mov, webm, mkv)."
        }
        (FailureKind::UnsupportedFormat, Language::Ru) => {
            "Неподдерживаемый формат. Отправьте видео (mp4, m4v, mov, webm, mkv)."
        }
        (FailureKind::ToolUnavailable, Language::En) => {
            "Processing is unavailable right now: the video tools are not installed on the server."
        }
        (FailureKind::ToolUnavailable, Language::Ru) => {
            "Обработка сейчас недоступна: на сервере не установлен FFmpeg."
        }
        (FailureKind::Processing, Language::En) => {
            "Sorry, the file could not be processed. Please try another clip."
        }
        (FailureKind::Processing, Language::Ru) => {
            "Не удалось обработать файл. Попробуйте другой ролик."
        }
    }
}

/// Caption sent with the finished archive
pub fn success_caption(parts: usize, language: Language) -> String {
    match language {
        Language::En => format!("Your showcase is ready: {} parts, one per column.", parts),
        Language::Ru => format!("Витрина готова: {} частей, по одной на колонку.", parts),
    }
}
