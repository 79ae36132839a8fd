//! Plan tiers and the processing policy each one grants.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::options::{Quality, VideoCodec};

/// Plan tier enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
}

impl PlanTier {
    /// Parse from string (case-insensitive). Unknown tiers get the free plan.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pro" => PlanTier::Pro,
            _ => PlanTier::Free,
        }
    }

    /// Get the plan name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a tier is allowed to choose when submitting a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanPolicy {
    /// Quality applied regardless of the request, if any.
    pub forced_quality: Option<Quality>,
    /// Codec applied regardless of the request, if any.
    pub forced_codec: Option<VideoCodec>,
    /// Whether the resize toggle is honored.
    pub allows_resize: bool,
    /// Whether output gets the watermark overlay.
    pub requires_watermark: bool,
}

impl PlanPolicy {
    /// Create the policy for a specific plan tier.
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => Self {
                forced_quality: Some(Quality::Fast),
                forced_codec: Some(VideoCodec::Vp8),
                allows_resize: false,
                requires_watermark: true,
            },
            PlanTier::Pro => Self {
                forced_quality: None,
                forced_codec: None,
                allows_resize: true,
                requires_watermark: false,
            },
        }
    }
}
