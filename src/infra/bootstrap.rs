//! Assemble runtime components from resolved [`Settings`].

use std::sync::Arc;

use tracing::info;

use crate::cache::{
    CacheConfig, CacheHandler, CdnPurger, HttpPurger, NoopPurger, PrerenderManifest, TagsManifest,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{PurgeSettings, Settings, StoreBackend, StoreSettings};
use crate::headers::{HeaderConfig, HeaderTranslator};
use crate::store::{BlobStore, FsStore, MemoryStore, ObjectStore};

use super::error::InfraError;
use super::http::HttpState;

pub fn build_store(
    settings: &StoreSettings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn ObjectStore>, InfraError> {
    let store: Arc<dyn ObjectStore> = match settings.backend {
        StoreBackend::Memory => {
            let lag_ms = i64::try_from(settings.replication_lag.as_millis()).unwrap_or(i64::MAX);
            Arc::new(MemoryStore::with_replication_lag(clock, lag_ms))
        }
        StoreBackend::Filesystem => Arc::new(FsStore::new(settings.root.clone())?),
    };
    info!(backend = ?settings.backend, root = %settings.root.display(), "object store ready");
    Ok(store)
}

pub fn build_purger(settings: &PurgeSettings) -> Result<Arc<dyn CdnPurger>, InfraError> {
    match settings.endpoint.clone() {
        Some(endpoint) => {
            let purger = HttpPurger::new(
                endpoint,
                settings.token.clone(),
                settings.site_id.clone(),
                settings.timeout,
            )?;
            info!(endpoint = %purger.endpoint(), "shared cache purge enabled");
            Ok(Arc::new(purger))
        }
        None => Ok(Arc::new(NoopPurger)),
    }
}

/// Build the cache handler; `purge` is false when the caller opts out of
/// shared cache purges.
pub fn build_handler(
    settings: &Settings,
    clock: Arc<dyn Clock>,
    purge: bool,
) -> Result<CacheHandler, InfraError> {
    let store = build_store(&settings.store, Arc::clone(&clock))?;
    let purger = if purge {
        build_purger(&settings.purge)?
    } else {
        Arc::new(NoopPurger)
    };

    let mut handler = CacheHandler::new(
        BlobStore::new(store),
        clock,
        CacheConfig::from(&settings.cache),
    )
    .with_purger(purger);

    if let Some(path) = settings.cache.prerender_manifest.as_deref() {
        let manifest = PrerenderManifest::load(path)?;
        info!(path = %path.display(), routes = manifest.len(), "prerender manifest loaded");
        handler = handler.with_prerender_manifest(manifest);
    }
    Ok(handler)
}

pub fn build_translator(
    settings: &Settings,
    handler: CacheHandler,
) -> Result<HeaderTranslator, InfraError> {
    let mut translator =
        HeaderTranslator::new(HeaderConfig::from(&settings.headers)).with_handler(handler);

    if let Some(path) = settings.cache.tags_manifest.as_deref() {
        let manifest = TagsManifest::load(path)?;
        info!(path = %path.display(), "tags manifest loaded");
        translator = translator.with_tags_manifest(manifest);
    }
    Ok(translator)
}

/// Build the handler for one-shot CLI commands. A process-local memory
/// store would be discarded on exit, so only shared backends are accepted.
pub fn build_cli_handler(
    settings: &Settings,
    clock: Arc<dyn Clock>,
    purge: bool,
) -> Result<CacheHandler, InfraError> {
    if settings.store.backend == StoreBackend::Memory {
        return Err(InfraError::configuration(
            "revalidate/tags need a shared store backend; set store.backend = \"filesystem\"",
        ));
    }
    build_handler(settings, clock, purge)
}

/// Everything `serve` needs, wired against the system clock.
pub fn build_http_state(settings: &Settings) -> Result<HttpState, InfraError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let handler = build_handler(settings, clock, true)?;
    let translator = build_translator(settings, handler.clone())?;
    Ok(HttpState::new(handler, translator).with_admin_token(settings.server.admin_token.clone()))
}
