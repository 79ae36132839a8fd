//! Chroma-key job orchestration.
//!
//! This crate turns an uploaded video into a transparent WebM:
//! - Staged intake (persist upload, resolve options, create the job record)
//! - A supervised background pipeline per job
//! - Ordered progress writes and retried terminal writes
//! - Output lookup for downloads

pub mod config;
pub mod error;
pub mod layout;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod output;
pub mod retry;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use layout::StorageLayout;
pub use logging::JobLogger;
pub use orchestrator::{Intake, JobOrchestrator, LaunchedJob, ENCODE_START_PROGRESS};
pub use output::{LocatedOutput, OutputLocator, OutputMatch};
pub use retry::{retry_async, RetryConfig, RetryResult};
