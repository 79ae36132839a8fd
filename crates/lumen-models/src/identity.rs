//! Caller identity as seen by the job pipeline.

use serde::{Deserialize, Serialize};

use crate::PlanTier;

/// Who submitted a job and which plan they are on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: Option<String>,
    pub tier: PlanTier,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, tier: PlanTier) -> Self {
        Self {
            user_id: Some(user_id.into()),
            tier,
        }
    }

    /// Unauthenticated caller on the free plan.
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            tier: PlanTier::Free,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}
