//! On-disk storage layout.
//!
//! ```text
//! <storage>/input/<jobId>.<ext>                  uploaded source
//! <storage>/webm/<basename>-<jobId>.webm         encoded output
//! ```

use std::path::{Path, PathBuf};

use lumen_models::JobId;

const DEFAULT_EXTENSION: &str = "mp4";
const DEFAULT_BASENAME: &str = "video";
const MAX_BASENAME_LEN: usize = 64;
const MAX_EXTENSION_LEN: usize = 8;

/// Paths for job inputs and outputs under one storage root.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("webm")
    }

    /// Create both directories if missing.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.input_dir()).await?;
        tokio::fs::create_dir_all(self.output_dir()).await
    }

    /// Where the upload for `job_id` is stored.
    pub fn input_path(&self, job_id: &JobId, original_filename: &str) -> PathBuf {
        self.input_dir()
            .join(format!("{}.{}", job_id, sanitize_extension(original_filename)))
    }

    /// Output file name for a job; unique per job id.
    pub fn output_filename(&self, job_id: &JobId, original_filename: &str) -> String {
        format!("{}-{}.webm", sanitize_basename(original_filename), job_id)
    }

    pub fn output_path(&self, output_filename: &str) -> PathBuf {
        self.output_dir().join(output_filename)
    }
}

/// Lowercase alphanumeric extension of a client filename, `mp4` if unusable.
pub fn sanitize_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// File stem reduced to `[A-Za-z0-9_-]`, never empty and never a path.
pub fn sanitize_basename(filename: &str) -> String {
    // Client names may use either separator.
    let name = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename);
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_BASENAME_LEN)
        .collect();

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        DEFAULT_BASENAME.to_string()
    } else {
        trimmed.to_string()
    }
}
