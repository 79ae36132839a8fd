//! Axum HTTP API server.
//!
//! This crate provides:
//! - Multipart upload intake that starts a chroma-key job
//! - Job status reads and a Server-Sent Events subscription
//! - Output download
//! - Bearer token identity, rate limiting and security headers
//! - Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use auth::{AnonymousIdentityProvider, CallerIdentity, IdentityProvider, JwtIdentityProvider};
pub use config::{ApiConfig, StoreBackend};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
