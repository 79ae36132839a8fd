//! FFmpeg CLI wrapper for chroma-key video processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - The chroma-key filter chain and text watermark
//! - Progress parsing from ffmpeg's diagnostic stream
//! - A subprocess runner with timeout and stderr tail capture
//! - Key color detection

pub mod color;
pub mod command;
pub mod error;
pub mod filters;
pub mod progress;
pub mod runner;
pub mod watermark;

pub use color::detect_key_color;
pub use command::{chroma_key_command, validate_paths, FfmpegCommand, DEFAULT_THREADS};
pub use error::{MediaError, MediaResult};
pub use filters::{chromakey_similarity, FilterChain};
pub use progress::{
    parse_duration_line, parse_progress_line, ProgressBand, ProgressTracker,
    DEFAULT_PROGRESS_STEP,
};
pub use runner::{check_ffmpeg, FfmpegRunner, LineSplitter};
pub use watermark::{WatermarkConfig, DEFAULT_WATERMARK_TEXT};
