use thiserror::Error;

use crate::cache::{CacheError, ManifestError, PurgeError};
use crate::config::LoadError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}

impl From<LoadError> for InfraError {
    fn from(err: LoadError) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<ManifestError> for InfraError {
    fn from(err: ManifestError) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<PurgeError> for InfraError {
    fn from(err: PurgeError) -> Self {
        Self::configuration(format!("failed to build purge client: {err}"))
    }
}

impl From<CacheError> for InfraError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Store(err) => Self::Store(err),
        }
    }
}
