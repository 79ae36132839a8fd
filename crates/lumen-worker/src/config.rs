//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use lumen_media::{DEFAULT_THREADS, DEFAULT_WATERMARK_TEXT};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root of the `input/` and `webm/` directories
    pub storage_path: PathBuf,
    /// Encoder binary
    pub ffmpeg_path: PathBuf,
    /// `-threads` passed to the encoder
    pub ffmpeg_threads: u32,
    /// Wall-clock limit per encode; `None` disables it
    pub ffmpeg_timeout: Option<Duration>,
    /// Free-tier watermark text
    pub watermark_text: String,
    /// Allow downloads to fall back to the newest output file
    pub download_recent_fallback: bool,
    /// Retries for the terminal status write
    pub terminal_write_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./storage"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffmpeg_threads: DEFAULT_THREADS,
            ffmpeg_timeout: None,
            watermark_text: DEFAULT_WATERMARK_TEXT.to_string(),
            download_recent_fallback: true,
            terminal_write_retries: 5,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            storage_path: std::env::var("STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_path),
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            ffmpeg_threads: std::env::var("FFMPEG_THREADS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&t: &u32| t > 0)
                .unwrap_or(defaults.ffmpeg_threads),
            ffmpeg_timeout: std::env::var("FFMPEG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs),
            watermark_text: std::env::var("WATERMARK_TEXT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.watermark_text),
            download_recent_fallback: std::env::var("DOWNLOAD_RECENT_FALLBACK")
                .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "no" | "off"))
                .unwrap_or(defaults.download_recent_fallback),
            terminal_write_retries: std::env::var("TERMINAL_WRITE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.terminal_write_retries),
        }
    }

    /// Storage rooted at `path`, everything else default.
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }
}
