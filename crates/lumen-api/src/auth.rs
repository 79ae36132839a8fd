//! Bearer token identity.
//!
//! Authentication is optional: a missing or invalid token makes the caller
//! anonymous on the free plan rather than rejecting the request.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::RequestPartsExt;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lumen_models::{Identity, PlanTier};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Decoded token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User ID
    pub sub: String,
    /// Expiration
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_metadata: Option<AppMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_tier: Option<String>,
}

impl TokenClaims {
    /// Top-level tier claim first, then `app_metadata`.
    pub fn tier(&self) -> PlanTier {
        self.subscription_tier
            .as_deref()
            .or_else(|| {
                self.app_metadata
                    .as_ref()
                    .and_then(|m| m.subscription_tier.as_deref())
            })
            .map(PlanTier::from_str)
            .unwrap_or_default()
    }
}

impl From<TokenClaims> for Identity {
    fn from(claims: TokenClaims) -> Self {
        let tier = claims.tier();
        Identity::new(claims.sub, tier)
    }
}

/// Maps an optional bearer token to the caller's identity.
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, token: Option<&str>) -> Identity;
}

/// Treats every caller as anonymous.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousIdentityProvider;

impl IdentityProvider for AnonymousIdentityProvider {
    fn resolve(&self, _token: Option<&str>) -> Identity {
        Identity::anonymous()
    }
}

/// Verifies HS256 tokens signed with a shared secret.
pub struct JwtIdentityProvider {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Tokens from hosted auth providers carry an audience we do not pin.
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> ApiResult<TokenClaims> {
        decode::<TokenClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| ApiError::unauthorized(format!("Token validation failed: {}", e)))
    }
}

impl IdentityProvider for JwtIdentityProvider {
    fn resolve(&self, token: Option<&str>) -> Identity {
        let Some(token) = token else {
            return Identity::anonymous();
        };

        match self.verify(token) {
            Ok(claims) => claims.into(),
            Err(e) => {
                debug!("Treating caller as anonymous: {}", e);
                Identity::anonymous()
            }
        }
    }
}

/// Axum extractor for the caller's identity. Never rejects.
#[derive(Debug, Clone)]
pub struct CallerIdentity(pub Identity);

#[axum::async_trait]
impl FromRequestParts<AppState> for CallerIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .ok();
        let token = bearer.as_ref().map(|TypedHeader(auth)| auth.token());

        Ok(CallerIdentity(state.identity.resolve(token)))
    }
}
