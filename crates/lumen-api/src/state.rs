//! Application state.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use lumen_store::{JobStore, MemoryJobStore, RedisJobStore, StoreResult};
use lumen_worker::{JobOrchestrator, OutputLocator, WorkerConfig, WorkerResult};

use crate::auth::{AnonymousIdentityProvider, IdentityProvider, JwtIdentityProvider};
use crate::config::{ApiConfig, StoreBackend};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn JobStore>,
    pub orchestrator: JobOrchestrator,
    pub outputs: OutputLocator,
    pub identity: Arc<dyn IdentityProvider>,
    /// Encoder binary checked by `/ready`
    pub ffmpeg_path: PathBuf,
}

impl AppState {
    /// Create new application state from configuration.
    pub async fn new(
        config: ApiConfig,
        worker: WorkerConfig,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let store = connect_store(&config).await?;
        let identity = identity_provider(&config);
        let state = Self::from_parts(config, &worker, store, identity);
        state.prepare().await?;
        Ok(state)
    }

    /// Assemble state from already constructed collaborators.
    pub fn from_parts(
        config: ApiConfig,
        worker: &WorkerConfig,
        store: Arc<dyn JobStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let orchestrator = JobOrchestrator::new(store.clone(), worker);
        let outputs = OutputLocator::new(
            orchestrator.layout().clone(),
            worker.download_recent_fallback,
        );

        Self {
            config,
            store,
            orchestrator,
            outputs,
            identity,
            ffmpeg_path: worker.ffmpeg_path.clone(),
        }
    }

    /// Create the storage directories.
    pub async fn prepare(&self) -> WorkerResult<()> {
        self.orchestrator.prepare().await
    }
}

/// Connect the configured job store.
pub async fn connect_store(config: &ApiConfig) -> StoreResult<Arc<dyn JobStore>> {
    match config.job_store {
        StoreBackend::Memory => {
            info!("Using in-memory job store");
            Ok(Arc::new(MemoryJobStore::new()))
        }
        StoreBackend::Redis => {
            let store = RedisJobStore::connect(&config.redis_url, config.job_ttl).await?;
            info!("Using Redis job store");
            Ok(Arc::new(store))
        }
    }
}

fn identity_provider(config: &ApiConfig) -> Arc<dyn IdentityProvider> {
    match &config.jwt_secret {
        Some(secret) => Arc::new(JwtIdentityProvider::new(secret)),
        None => {
            warn!("JWT_SECRET not set; all callers are treated as anonymous");
            Arc::new(AnonymousIdentityProvider)
        }
    }
}
