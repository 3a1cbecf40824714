//! In-process object store.
//!
//! Keeps the previous version of every key so that eventually-consistent reads
//! issued within the replication lag of a write observe what a lagging replica
//! would have served.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::clock::{Clock, Timestamp};

use super::{Consistency, ListEntry, ObjectStore, StoreError, StoredObject, validate_key};

#[derive(Debug, Clone)]
struct Versioned {
    current: StoredObject,
    previous: Option<StoredObject>,
}

pub struct MemoryStore {
    entries: DashMap<String, Versioned>,
    clock: Arc<dyn Clock>,
    replication_lag_ms: i64,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_replication_lag(clock, 0)
    }

    pub fn with_replication_lag(clock: Arc<dyn Clock>, replication_lag_ms: i64) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            replication_lag_ms: replication_lag_ms.max(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn replicated(&self, written_at: Timestamp) -> bool {
        self.clock.now() >= written_at + self.replication_lag_ms
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_with_metadata(
        &self,
        key: &str,
        consistency: Consistency,
    ) -> Result<Option<StoredObject>, StoreError> {
        validate_key(key)?;
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };

        let visible = match consistency {
            Consistency::Strong => Some(entry.current.clone()),
            Consistency::Eventual if self.replicated(entry.current.last_modified) => {
                Some(entry.current.clone())
            }
            Consistency::Eventual => entry.previous.clone(),
        };
        Ok(visible)
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        validate_key(key)?;
        let stored = StoredObject {
            value,
            last_modified: self.clock.now(),
        };

        self.entries
            .entry(key.to_string())
            .and_modify(|versioned| {
                let replaced = std::mem::replace(&mut versioned.current, stored.clone());
                // A replica that never caught up with `replaced` still serves the older value.
                if self.replicated(replaced.last_modified) || versioned.previous.is_none() {
                    versioned.previous = Some(replaced);
                }
            })
            .or_insert_with(|| Versioned {
                current: stored.clone(),
                previous: None,
            });
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, StoreError> {
        let mut listed: Vec<ListEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| ListEntry {
                key: entry.key().clone(),
                last_modified: entry.current.last_modified,
            })
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }
}
