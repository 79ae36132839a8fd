//! Shared data models for the LumenFlow backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, job status and partial job updates
//! - Processing options and the tier-aware options resolver
//! - Plan tiers and caller identity

pub mod identity;
pub mod job;
pub mod options;
pub mod plan;

// Re-export common types
pub use identity::Identity;
pub use job::{Job, JobId, JobPatch, JobStatus, JobTransitionError, INTAKE_PROGRESS};
pub use options::{
    normalize_hex_color, resolve_options, OptionsParseError, ProcessingOptions, Quality,
    RawProcessingOptions, ResolvedOptions, VideoCodec,
};
pub use plan::{PlanPolicy, PlanTier};
