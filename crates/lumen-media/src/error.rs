//! Error types for media operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Whole seconds read as "N seconds", anything finer as milliseconds.
fn format_limit(limit: &Duration) -> String {
    if limit.subsec_nanos() == 0 {
        format!("{} seconds", limit.as_secs())
    } else {
        format!("{} ms", limit.as_millis())
    }
}

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("Failed to spawn ffmpeg: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// The encoder ran and reported failure. `message` is what the job shows.
    #[error("{message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("ffmpeg timed out after {}", format_limit(.0))]
    Timeout(Duration),

    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Input path is not a file: {0}")]
    InputNotAFile(PathBuf),

    #[error("Output directory {path} is not writable: {reason}")]
    OutputNotWritable { path: PathBuf, reason: String },

    #[error("Key color detection failed: {0}")]
    ColorDetection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an output directory error.
    pub fn output_not_writable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::OutputNotWritable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a color detection error.
    pub fn color_detection(message: impl Into<String>) -> Self {
        Self::ColorDetection(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the error happened before any subprocess was started.
    pub fn is_pre_launch(&self) -> bool {
        matches!(
            self,
            Self::InputNotFound(_) | Self::InputNotAFile(_) | Self::OutputNotWritable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_keeps_sub_second_limits() {
        assert_eq!(
            MediaError::Timeout(Duration::from_secs(30)).to_string(),
            "ffmpeg timed out after 30 seconds"
        );
        assert_eq!(
            MediaError::Timeout(Duration::from_millis(1500)).to_string(),
            "ffmpeg timed out after 1500 ms"
        );
    }
}
