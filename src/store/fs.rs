//! Filesystem-backed object store.
//!
//! Each key maps to `<root>/<key>.blob`. A local filesystem has a single
//! replica, so every read is strongly consistent.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::clock::Timestamp;

use super::{Consistency, ListEntry, ObjectStore, StoreError, StoredObject, validate_key};

const BLOB_SUFFIX: &str = ".blob";

#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}{BLOB_SUFFIX}")))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let relative = relative.to_str()?.replace(std::path::MAIN_SEPARATOR, "/");
        relative.strip_suffix(BLOB_SUFFIX).map(str::to_string)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn get_with_metadata(
        &self,
        key: &str,
        _consistency: Consistency,
    ) -> Result<Option<StoredObject>, StoreError> {
        let path = self.resolve(key)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };
        let metadata = fs::metadata(&path).await?;

        Ok(Some(StoredObject {
            value: Bytes::from(data),
            last_modified: modified_millis(metadata.modified()?),
        }))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so concurrent readers never see a partial value.
        let staging = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&staging).await?;
        if let Err(err) = file.write_all(&value).await {
            drop(file);
            let _ = fs::remove_file(&staging).await;
            return Err(StoreError::Io(err));
        }
        file.flush().await?;
        drop(file);
        fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, StoreError> {
        let mut listed = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StoreError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                if !key.starts_with(prefix) {
                    continue;
                }
                let modified = entry.metadata().await?.modified()?;
                listed.push(ListEntry {
                    key,
                    last_modified: modified_millis(modified),
                });
            }
        }

        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }
}

fn modified_millis(modified: SystemTime) -> Timestamp {
    modified
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as Timestamp)
        .unwrap_or_default()
}
