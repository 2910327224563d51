use std::sync::Arc;

use crate::config::ProcessConfig;
use crate::csrf::CsrfProtect;
use crate::error::{ConfigError, StorageError};
use crate::rate_limit::RateLimiterFacade;
use crate::security::SecurityHeaders;
use crate::session::SessionManager;
use crate::storage::Storage;

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One instance of every collaborator, built once at startup and handed to
/// route groups as `web::Data<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProcessConfig>,
    pub storage: Storage,
    pub sessions: SessionManager,
    pub csrf: CsrfProtect,
    pub headers: SecurityHeaders,
    pub rate_limiter: RateLimiterFacade,
}

impl AppState {
    /// Needs a Tokio runtime for the storage pool.
    pub fn build(config: Arc<ProcessConfig>) -> Result<Self, BuildError> {
        Ok(Self {
            storage: Storage::connect_lazy(&config.database_location)?,
            sessions: SessionManager::new(&config),
            csrf: CsrfProtect::new(&config),
            headers: SecurityHeaders::from_config(&config)?,
            rate_limiter: RateLimiterFacade::from_location(
                &config.rate_limit_backend_location,
                config.rate_limit.clone(),
            )?,
            config,
        })
    }
}
