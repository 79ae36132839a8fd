//! Worker error types.

use thiserror::Error;

use lumen_media::MediaError;
use lumen_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Uploaded file is empty")]
    EmptyUpload,

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Message stored on the failed job.
    ///
    /// Pre-launch failures name the problem without server paths.
    pub fn job_message(&self) -> String {
        match self {
            WorkerError::Media(MediaError::InputNotFound(_))
            | WorkerError::Media(MediaError::InputNotAFile(_)) => {
                "Uploaded file is missing or unreadable".to_string()
            }
            WorkerError::Media(MediaError::OutputNotWritable { .. }) => {
                "Output directory is not writable".to_string()
            }
            WorkerError::Io(_) | WorkerError::Store(_) => "Internal processing error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_job_message_keeps_exit_reason() {
        let err = WorkerError::from(MediaError::ffmpeg_failed(
            "ffmpeg exited with code 1",
            None,
            Some(1),
        ));
        assert_eq!(err.job_message(), "ffmpeg exited with code 1");
    }

    #[test]
    fn test_job_message_hides_paths() {
        let err = WorkerError::from(MediaError::InputNotFound(PathBuf::from(
            "/srv/storage/input/abc.mp4",
        )));
        assert!(!err.job_message().contains("/srv"));
    }
}
