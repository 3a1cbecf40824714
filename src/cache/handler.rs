//! Cache handler: the `get` / `set` / `revalidate_tag` contract used by the renderer.
//!
//! The handler is immutable and shared across requests. Everything it learns
//! about the current request goes into the task-local
//! [`RequestContext`](crate::context::RequestContext), never onto `self`.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, Timestamp};
use crate::context::{CacheLookupRecord, get_request_context, track_background_work};
use crate::store::{BlobStore, Consistency, StoreError};

use super::config::CacheConfig;
use super::entry::{CacheEntry, CacheEntryValue, RenderTree, Revalidate};
use super::keys::{CacheKey, implicit_tag};
use super::manifest::PrerenderManifest;
use super::purge::{CdnPurger, NoopPurger};
use super::tags::TagManifest;

pub(crate) const METRIC_CACHE_HIT: &str = "revalidator_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "revalidator_cache_miss_total";
pub(crate) const METRIC_CACHE_STALE: &str = "revalidator_cache_stale_total";
pub(crate) const METRIC_STORE_ERROR: &str = "revalidator_store_error_total";
pub(crate) const METRIC_TAG_REVALIDATE: &str = "revalidator_tag_revalidate_total";
pub(crate) const METRIC_PURGE_FAILURE: &str = "revalidator_purge_failure_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Options for a lookup.
#[derive(Debug, Clone, Default)]
pub struct GetContext {
    /// Revalidate period requested by the caller; a number overrides the
    /// manifest TTL.
    pub revalidate: Option<Revalidate>,
    /// Look up a data fetch rather than a page or route.
    pub fetch_cache: bool,
    /// Tags the fetch was declared with.
    pub tags: Vec<String>,
    /// Tags inherited from the page performing the fetch.
    pub soft_tags: Vec<String>,
}

impl GetContext {
    pub fn page() -> Self {
        Self::default()
    }

    pub fn fetch() -> Self {
        Self {
            fetch_cache: true,
            ..Self::default()
        }
    }

    pub fn with_revalidate(mut self, revalidate: Revalidate) -> Self {
        self.revalidate = Some(revalidate);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_soft_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.soft_tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Options for a write.
#[derive(Debug, Clone, Default)]
pub struct SetContext {
    pub revalidate: Option<Revalidate>,
    /// Tags attached to a fetch entry when its data does not carry any.
    pub tags: Vec<String>,
}

/// Why an entry was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Expired { expired_at: Timestamp },
    TagRevalidated { revalidated_at: Timestamp },
}

/// Verdict of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Fresh(CacheEntry),
    Stale(CacheEntry, StaleReason),
    Miss,
}

impl Lookup {
    pub fn into_fresh(self) -> Option<CacheEntry> {
        match self {
            Lookup::Fresh(entry) => Some(entry),
            Lookup::Stale(..) | Lookup::Miss => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Lookup::Fresh(_) => "HIT",
            Lookup::Stale(..) => "STALE",
            Lookup::Miss => "MISS",
        }
    }
}

#[derive(Clone)]
pub struct CacheHandler {
    store: BlobStore,
    tags: TagManifest,
    purger: Arc<dyn CdnPurger>,
    clock: Arc<dyn Clock>,
    config: Arc<CacheConfig>,
    prerender: Arc<PrerenderManifest>,
}

impl CacheHandler {
    pub fn new(store: BlobStore, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            tags: TagManifest::new(store.clone()),
            store,
            purger: Arc::new(NoopPurger),
            clock,
            config: Arc::new(config),
            prerender: Arc::new(PrerenderManifest::default()),
        }
    }

    pub fn with_purger(mut self, purger: Arc<dyn CdnPurger>) -> Self {
        self.purger = purger;
        self
    }

    pub fn with_prerender_manifest(mut self, manifest: PrerenderManifest) -> Self {
        self.prerender = Arc::new(manifest);
        self
    }

    pub fn tag_manifest(&self) -> &TagManifest {
        &self.tags
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// The fresh entry for `key`, or `None` when missing or stale.
    pub async fn get(&self, key: &str, ctx: &GetContext) -> Option<CacheEntry> {
        self.lookup(key, ctx).await.into_fresh()
    }

    /// Resolve `key` to a definitive verdict.
    ///
    /// Candidates are probed in order; the first fresh entry wins. Stale
    /// entries do not stop the probe, and the first one seen is reported when
    /// nothing fresh exists. Store failures degrade to a miss.
    #[instrument(skip(self, ctx), fields(fetch = ctx.fetch_cache))]
    pub async fn lookup(&self, key: &str, ctx: &GetContext) -> Lookup {
        let started_at = Instant::now();
        let kind = if ctx.fetch_cache { "fetch" } else { "page" };
        let mut stale = None;

        for candidate in self.candidates(key, ctx) {
            let storage_key = candidate.to_string();
            let entry = match self
                .store
                .get_json::<CacheEntry>(&storage_key, Consistency::Eventual)
                .await
            {
                Ok(Some(mut entry)) => {
                    entry.key = storage_key;
                    entry
                }
                Ok(None) => continue,
                Err(err) => {
                    counter!(METRIC_STORE_ERROR, "op" => "get").increment(1);
                    warn!(key = %storage_key, error = %err, "cache read failed; treating as miss");
                    continue;
                }
            };

            let revalidate = self.revalidate_for(candidate.logical(), &entry, ctx);
            let tags = self.tags_for(candidate.logical(), &entry, ctx);
            match self.verdict(entry, revalidate, &tags).await {
                Lookup::Fresh(mut entry) => {
                    if let CacheEntryValue::Fetch(fetch) = &mut entry.value {
                        fetch.revalidate.get_or_insert(revalidate);
                    }
                    if !ctx.fetch_cache {
                        record_lookup(&entry, tags);
                    }
                    counter!(METRIC_CACHE_HIT, "kind" => kind).increment(1);
                    debug!(key = %entry.key, last_modified = entry.last_modified, "cache hit");
                    record_timing(started_at, "HIT");
                    return Lookup::Fresh(entry);
                }
                Lookup::Stale(entry, reason) => {
                    debug!(key = %entry.key, ?reason, "cache entry stale");
                    if stale.is_none() {
                        stale = Some((entry, reason, tags));
                    }
                }
                Lookup::Miss => {}
            }
        }

        match stale {
            Some((entry, reason, tags)) => {
                if !ctx.fetch_cache {
                    record_lookup(&entry, tags);
                }
                counter!(METRIC_CACHE_STALE, "kind" => kind).increment(1);
                record_timing(started_at, "STALE");
                Lookup::Stale(entry, reason)
            }
            None => {
                counter!(METRIC_CACHE_MISS, "kind" => kind).increment(1);
                debug!(key, "cache miss");
                record_timing(started_at, "MISS");
                Lookup::Miss
            }
        }
    }

    fn candidates(&self, key: &str, ctx: &GetContext) -> Vec<CacheKey> {
        if ctx.fetch_cache {
            return vec![CacheKey::fetch(key)];
        }
        let mut candidates = vec![CacheKey::page(key)];
        if self.config.app_tree {
            candidates.push(CacheKey::app(key));
        }
        candidates
    }

    /// Effective revalidate period: a numeric caller value, then the value the
    /// entry was stored with, then the prerender manifest, then the default.
    pub fn revalidate_for(&self, route: &str, entry: &CacheEntry, ctx: &GetContext) -> Revalidate {
        if let Some(Revalidate::After(secs)) = ctx.revalidate {
            return Revalidate::After(secs);
        }

        let stored = match &entry.value {
            CacheEntryValue::Route(route) => route.revalidate,
            CacheEntryValue::Fetch(fetch) => fetch.revalidate,
            CacheEntryValue::Page(_) => None,
        };

        stored
            .or_else(|| {
                if ctx.fetch_cache {
                    None
                } else {
                    self.prerender.revalidate_for(route)
                }
            })
            .unwrap_or_else(|| self.config.default_revalidate())
    }

    fn tags_for(&self, logical: &str, entry: &CacheEntry, ctx: &GetContext) -> Vec<String> {
        let mut tags = match &entry.value {
            CacheEntryValue::Fetch(fetch) => {
                let mut tags = fetch.data.tags.clone().unwrap_or_default();
                tags.extend(ctx.tags.iter().cloned());
                tags.extend(ctx.soft_tags.iter().cloned());
                tags
            }
            value => {
                let mut tags = value.header_tags();
                tags.push(implicit_tag(logical));
                tags
            }
        };

        let mut seen = std::collections::HashSet::new();
        tags.retain(|tag| seen.insert(tag.clone()));
        tags
    }

    async fn verdict(&self, entry: CacheEntry, revalidate: Revalidate, tags: &[String]) -> Lookup {
        if let Some(expired_at) = revalidate.expires_at(entry.last_modified)
            && self.clock.now() >= expired_at
        {
            return Lookup::Stale(entry, StaleReason::Expired { expired_at });
        }

        if tags.is_empty() {
            return Lookup::Fresh(entry);
        }

        match self.tags.latest_for(tags).await {
            Ok(Some(revalidated_at)) if revalidated_at > entry.last_modified => {
                Lookup::Stale(entry, StaleReason::TagRevalidated { revalidated_at })
            }
            Ok(_) => Lookup::Fresh(entry),
            Err(err) => {
                counter!(METRIC_STORE_ERROR, "op" => "tags").increment(1);
                warn!(key = %entry.key, error = %err, "tag manifest read failed; skipping tag check");
                Lookup::Fresh(entry)
            }
        }
    }

    /// Store `value` under `key` with a fresh `lastModified`.
    #[instrument(skip(self, value, ctx), fields(kind = value.kind()))]
    pub async fn set(
        &self,
        key: &str,
        mut value: CacheEntryValue,
        ctx: &SetContext,
    ) -> Result<(), CacheError> {
        let storage_key = match &mut value {
            CacheEntryValue::Page(page) => match page.tree {
                RenderTree::Pages => CacheKey::page(key),
                RenderTree::App => CacheKey::app(key),
            },
            CacheEntryValue::Route(route) => {
                if route.revalidate.is_none() {
                    route.revalidate = ctx.revalidate;
                }
                CacheKey::app(key)
            }
            CacheEntryValue::Fetch(fetch) => {
                if fetch.revalidate.is_none() {
                    fetch.revalidate = ctx.revalidate;
                }
                if fetch.data.tags.is_none() && !ctx.tags.is_empty() {
                    fetch.data.tags = Some(ctx.tags.clone());
                }
                CacheKey::fetch(key)
            }
        };

        let purge_page = matches!(&value, CacheEntryValue::Page(page) if page.tree == RenderTree::Pages);

        let entry = CacheEntry {
            key: storage_key.to_string(),
            last_modified: self.clock.now(),
            value,
        };

        if let Err(err) = self.store.set_json(&entry.key, &entry).await {
            counter!(METRIC_STORE_ERROR, "op" => "set").increment(1);
            return Err(err.into());
        }
        debug!(key = %entry.key, last_modified = entry.last_modified, "cache entry written");

        let on_demand = get_request_context().is_some_and(|ctx| ctx.did_on_demand_revalidate());
        if purge_page && on_demand {
            let tag = implicit_tag(storage_key.logical());
            let handler = self.clone();
            track_background_work(async move {
                handler.purge_tags(&[tag]).await;
            });
        }

        Ok(())
    }

    /// [`set`](Self::set) as tracked background work.
    pub fn spawn_set(&self, key: impl Into<String>, value: CacheEntryValue, ctx: SetContext) {
        let handler = self.clone();
        let key = key.into();
        track_background_work(async move {
            if let Err(err) = handler.set(&key, value, &ctx).await {
                warn!(key, error = %err, "background cache write failed");
            }
        });
    }

    pub async fn revalidate_tag(&self, tag: &str) -> Result<(), CacheError> {
        self.revalidate_tags(&[tag.to_string()]).await
    }

    /// Mark every tag revalidated at one timestamp, then purge them in one batch.
    #[instrument(skip(self), fields(count = tags.len()))]
    pub async fn revalidate_tags(&self, tags: &[String]) -> Result<(), CacheError> {
        if tags.is_empty() {
            return Ok(());
        }

        let at = self.clock.now();
        let writes = tags.iter().map(|tag| self.tags.mark_revalidated(tag, at));
        let mut first_error = None;
        for (tag, result) in tags.iter().zip(join_all(writes).await) {
            match result {
                Ok(_) => counter!(METRIC_TAG_REVALIDATE).increment(1),
                Err(err) => {
                    counter!(METRIC_STORE_ERROR, "op" => "revalidate").increment(1);
                    warn!(tag, error = %err, "failed to record tag revalidation");
                    first_error.get_or_insert(err);
                }
            }
        }
        info!(at, tags = ?tags, "tags revalidated");

        let handler = self.clone();
        let purge = tags.to_vec();
        track_background_work(async move {
            handler.purge_tags(&purge).await;
        });

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// [`revalidate_tags`](Self::revalidate_tags) as tracked background work.
    pub fn spawn_revalidate_tags(&self, tags: Vec<String>) {
        let handler = self.clone();
        track_background_work(async move {
            if let Err(err) = handler.revalidate_tags(&tags).await {
                warn!(error = %err, "background tag revalidation failed");
            }
        });
    }

    /// Best-effort purge of `tags` from the shared cache.
    pub async fn purge_tags(&self, tags: &[String]) {
        match self.purger.purge_tags(tags).await {
            Ok(()) => debug!(tags = ?tags, "shared cache purged"),
            Err(err) => {
                counter!(METRIC_PURGE_FAILURE).increment(1);
                warn!(tags = ?tags, error = %err, "shared cache purge failed");
            }
        }
    }

    /// `lastModified` of the page stored for `path`, read with strong consistency.
    pub async fn last_modified_for_path(&self, path: &str) -> Option<Timestamp> {
        for candidate in self.candidates(path, &GetContext::page()) {
            let storage_key = candidate.to_string();
            match self
                .store
                .get_json::<CacheEntry>(&storage_key, Consistency::Strong)
                .await
            {
                Ok(Some(entry)) => return Some(entry.last_modified),
                Ok(None) => {}
                Err(err) => {
                    counter!(METRIC_STORE_ERROR, "op" => "get").increment(1);
                    warn!(key = %storage_key, error = %err, "strong cache read failed");
                }
            }
        }
        None
    }
}

fn record_lookup(entry: &CacheEntry, tags: Vec<String>) {
    let Some(context) = get_request_context() else {
        return;
    };
    let route_handler_revalidate = match &entry.value {
        CacheEntryValue::Route(route) => route.revalidate,
        _ => None,
    };
    context.record_cache_lookup(CacheLookupRecord {
        key: entry.key.clone(),
        last_modified: entry.last_modified,
        tags,
        route_handler_revalidate,
    });
}

fn record_timing(started_at: Instant, status: &str) {
    if let Some(context) = get_request_context() {
        context.record_timing(
            "cache",
            started_at.elapsed().as_secs_f64() * 1000.0,
            Some(status),
        );
    }
}
