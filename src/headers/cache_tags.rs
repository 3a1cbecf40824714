use axum::http::{HeaderMap, HeaderValue, header::CACHE_CONTROL};

use crate::cache::TagsManifest;
use crate::context::ContextSnapshot;

use super::{HeaderConfig, HeaderError, RequestInfo};

/// Publish the response's tags so the shared cache can purge by tag.
///
/// Tags recorded by the cache lookup win when the response is cacheable;
/// otherwise the build-time path manifest is consulted.
pub(crate) fn set_cache_tags_headers(
    headers: &mut HeaderMap,
    request: &RequestInfo,
    context: Option<&ContextSnapshot>,
    manifest: &TagsManifest,
    config: &HeaderConfig,
) -> Result<(), HeaderError> {
    let cacheable =
        headers.contains_key(CACHE_CONTROL) || headers.contains_key(&config.shared_cache_control);

    let recorded = context
        .and_then(|snapshot| snapshot.response_cache_tags.as_deref())
        .filter(|_| cacheable);

    let Some(tags) = recorded.or_else(|| manifest.tags_for_path(&request.path)) else {
        return Ok(());
    };

    headers.insert(
        config.cache_tag.clone(),
        HeaderValue::from_str(&tags.join(","))?,
    );
    Ok(())
}
