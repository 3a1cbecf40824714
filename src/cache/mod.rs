//! Incremental rendering cache.
//!
//! Rendered artifacts (pages, route-handler responses and data fetches) are
//! persisted in the object store and reused until they expire:
//!
//! - **Time-based**: an entry older than its revalidate period is stale.
//! - **Tag-based**: an entry is stale once any of its tags was revalidated
//!   after it was written.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! app_tree = true
//! default_revalidate_seconds = 60
//! prerender_manifest = "build/prerender-manifest.json"
//! ```

mod config;
mod entry;
mod handler;
mod keys;
mod manifest;
mod purge;
mod tags;

pub use config::CacheConfig;
pub use entry::{
    CACHE_TAGS_HEADER, CacheEntry, CacheEntryValue, FetchData, FetchValue, PageData, PageValue,
    RenderTree, Revalidate, RouteValue, StoredHeaders,
};
pub use handler::{CacheError, CacheHandler, GetContext, Lookup, SetContext, StaleReason};
pub(crate) use handler::{
    METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_STALE, METRIC_PURGE_FAILURE,
    METRIC_STORE_ERROR, METRIC_TAG_REVALIDATE,
};
pub use keys::{
    APP_NAMESPACE, CacheKey, FETCH_NAMESPACE, IMPLICIT_TAG_PREFIX, Namespace, PAGES_NAMESPACE,
    implicit_tag, normalize_route, route_path,
};
pub use manifest::{ManifestError, PrerenderManifest, TagsManifest};
pub use purge::{CdnPurger, HttpPurger, NoopPurger, PurgeError};
pub use tags::{TAGS_PREFIX, TagManifest, TagManifestEntry};
