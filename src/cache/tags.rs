//! Tag manifest: `tag -> { revalidatedAt }`, one store entry per tag.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Timestamp;
use crate::store::{BlobStore, Consistency, StoreError};

pub const TAGS_PREFIX: &str = "tags/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTag {
    revalidated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagManifestEntry {
    pub tag: String,
    pub revalidated_at: Timestamp,
}

#[derive(Clone)]
pub struct TagManifest {
    store: BlobStore,
}

impl TagManifest {
    pub fn new(store: BlobStore) -> Self {
        Self { store }
    }

    /// Flat store key for an arbitrary tag string.
    pub fn key_for(tag: &str) -> String {
        format!("{TAGS_PREFIX}{}", URL_SAFE_NO_PAD.encode(tag))
    }

    fn tag_from_key(key: &str) -> Option<String> {
        let encoded = key.strip_prefix(TAGS_PREFIX)?;
        let raw = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        String::from_utf8(raw).ok()
    }

    pub async fn revalidated_at(
        &self,
        tag: &str,
        consistency: Consistency,
    ) -> Result<Option<Timestamp>, StoreError> {
        let stored: Option<StoredTag> = self.store.get_json(&Self::key_for(tag), consistency).await?;
        Ok(stored.map(|stored| stored.revalidated_at))
    }

    /// Record a revalidation. Returns `false` when the stored timestamp is
    /// already at or past `at`.
    ///
    /// The read and the write are separate store calls, so two writers racing
    /// on the same tag are last-writer-wins and an older timestamp can land
    /// last.
    pub async fn mark_revalidated(&self, tag: &str, at: Timestamp) -> Result<bool, StoreError> {
        if let Some(current) = self.revalidated_at(tag, Consistency::Strong).await? {
            if current >= at {
                debug!(tag, current, at, "tag already revalidated at or after requested time");
                return Ok(false);
            }
        }

        self.store
            .set_json(&Self::key_for(tag), &StoredTag { revalidated_at: at })
            .await?;
        Ok(true)
    }

    /// Most recent revalidation across `tags`, reading all entries concurrently.
    pub async fn latest_for(&self, tags: &[String]) -> Result<Option<Timestamp>, StoreError> {
        let reads = tags
            .iter()
            .map(|tag| self.revalidated_at(tag, Consistency::Eventual));

        let mut latest = None;
        for result in join_all(reads).await {
            if let Some(at) = result? {
                latest = Some(latest.map_or(at, |current: Timestamp| current.max(at)));
            }
        }
        Ok(latest)
    }

    pub async fn entries(&self) -> Result<Vec<TagManifestEntry>, StoreError> {
        let listed = self.store.list(TAGS_PREFIX).await?;
        let mut entries = Vec::with_capacity(listed.len());

        for item in listed {
            let Some(tag) = Self::tag_from_key(&item.key) else {
                continue;
            };
            let stored: Option<StoredTag> =
                self.store.get_json(&item.key, Consistency::Strong).await?;
            if let Some(stored) = stored {
                entries.push(TagManifestEntry {
                    tag,
                    revalidated_at: stored.revalidated_at,
                });
            }
        }

        entries.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn manifest() -> TagManifest {
        let store = MemoryStore::new(Arc::new(ManualClock::new(0)));
        TagManifest::new(BlobStore::new(Arc::new(store)))
    }

    #[test]
    fn keys_are_flat_and_reversible() {
        let key = TagManifest::key_for("_N_T_/blog/post");
        assert!(key.starts_with(TAGS_PREFIX));
        assert!(!key[TAGS_PREFIX.len()..].contains('/'));
        assert_eq!(
            TagManifest::tag_from_key(&key).as_deref(),
            Some("_N_T_/blog/post")
        );
    }

    #[tokio::test]
    async fn sequential_revalidations_never_move_backwards() {
        let tags = manifest();
        assert!(tags.mark_revalidated("posts", 2_000).await.expect("mark"));
        assert!(!tags.mark_revalidated("posts", 1_000).await.expect("mark"));
        assert!(!tags.mark_revalidated("posts", 2_000).await.expect("mark"));
        assert_eq!(
            tags.revalidated_at("posts", Consistency::Strong)
                .await
                .expect("read"),
            Some(2_000)
        );
        assert!(tags.mark_revalidated("posts", 3_000).await.expect("mark"));
    }

    #[tokio::test]
    async fn latest_for_takes_the_maximum() {
        let tags = manifest();
        tags.mark_revalidated("a", 10).await.expect("mark");
        tags.mark_revalidated("b", 30).await.expect("mark");

        let latest = tags
            .latest_for(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .expect("latest");
        assert_eq!(latest, Some(30));

        let none = tags.latest_for(&["c".to_string()]).await.expect("latest");
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn entries_lists_decoded_tags() {
        let tags = manifest();
        tags.mark_revalidated("zeta", 1).await.expect("mark");
        tags.mark_revalidated("alpha/beta", 2).await.expect("mark");

        let entries = tags.entries().await.expect("entries");
        assert_eq!(
            entries,
            vec![
                TagManifestEntry {
                    tag: "alpha/beta".to_string(),
                    revalidated_at: 2
                },
                TagManifestEntry {
                    tag: "zeta".to_string(),
                    revalidated_at: 1
                },
            ]
        );
    }
}
