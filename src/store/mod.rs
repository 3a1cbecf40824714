//! Object store client.
//!
//! A flat key/value blob store with per-call consistency. Backends implement
//! [`ObjectStore`]; callers use the typed [`BlobStore`] facade.

mod fs;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::clock::Timestamp;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Read consistency requested for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    /// Fast path; may observe a value older than the latest write.
    #[default]
    Eventual,
    /// Always observes the latest completed write.
    Strong,
}

/// A stored value with the time the store accepted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub value: Bytes,
    pub last_modified: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub key: String,
    pub last_modified: Timestamp,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store key `{0}`")]
    InvalidKey(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode value at `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("value at `{0}` is not valid utf-8")]
    Utf8(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str, consistency: Consistency) -> Result<Option<Bytes>, StoreError> {
        Ok(self
            .get_with_metadata(key, consistency)
            .await?
            .map(|stored| stored.value))
    }

    async fn get_with_metadata(
        &self,
        key: &str,
        consistency: Consistency,
    ) -> Result<Option<StoredObject>, StoreError>;

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError>;

    /// Entries whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, StoreError>;
}

/// Typed access over any [`ObjectStore`].
#[derive(Clone)]
pub struct BlobStore {
    inner: Arc<dyn ObjectStore>,
}

impl BlobStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    pub fn raw(&self) -> &Arc<dyn ObjectStore> {
        &self.inner
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
        consistency: Consistency,
    ) -> Result<Option<T>, StoreError> {
        match self.inner.get(key, consistency).await? {
            Some(bytes) => decode_json(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub async fn get_text(
        &self,
        key: &str,
        consistency: Consistency,
    ) -> Result<Option<String>, StoreError> {
        match self.inner.get(key, consistency).await? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| StoreError::Utf8(key.to_string())),
            None => Ok(None),
        }
    }

    pub async fn get_with_metadata(
        &self,
        key: &str,
        consistency: Consistency,
    ) -> Result<Option<StoredObject>, StoreError> {
        self.inner.get_with_metadata(key, consistency).await
    }

    pub async fn set(&self, key: &str, value: impl Into<Bytes>) -> Result<(), StoreError> {
        self.inner.set(key, value.into()).await
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.inner.set(key, Bytes::from(encoded)).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, StoreError> {
        self.inner.list(prefix).await
    }
}

pub(crate) fn decode_json<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}

/// Reject keys that cannot be mapped onto a relative path.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
