//! Rewrite `date` on cached responses to the entry's `lastModified`.
//!
//! A shared cache computes residual freshness from `date` + `max-age`; a
//! wall-clock `date` on a cached response would over-count it.

use axum::http::{HeaderMap, HeaderValue, header::DATE};
use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};

use crate::cache::CacheHandler;
use crate::clock::Timestamp;
use crate::context::ContextSnapshot;

use super::cache_status::CacheStatus;
use super::{HeaderError, ORIGINAL_DATE_HEADER, RequestInfo};

const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// IMF-fixdate rendering of a millisecond timestamp.
pub fn http_date(timestamp: Timestamp) -> Result<String, HeaderError> {
    let instant = OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp) * 1_000_000)
        .map_err(|_| HeaderError::InvalidTimestamp(timestamp))?;
    instant
        .format(HTTP_DATE)
        .map_err(|_| HeaderError::InvalidTimestamp(timestamp))
}

pub(crate) async fn adjust_date_header(
    headers: &mut HeaderMap,
    request: &RequestInfo,
    context: Option<&ContextSnapshot>,
    handler: Option<&CacheHandler>,
) -> Result<(), HeaderError> {
    if !CacheStatus::from_headers(headers).is_some_and(CacheStatus::is_cached) {
        return Ok(());
    }

    let recorded = context.and_then(|snapshot| snapshot.response_cache_get_last_modified);
    let last_modified = match (recorded, handler) {
        (Some(last_modified), _) => Some(last_modified),
        (None, Some(handler)) => handler.last_modified_for_path(&request.path).await,
        (None, None) => None,
    };
    let Some(last_modified) = last_modified else {
        return Ok(());
    };

    let rendered = http_date(last_modified)?;
    let original = match headers.get(DATE) {
        Some(date) => date.clone(),
        None => HeaderValue::from_str(&rendered)?,
    };

    headers.insert(ORIGINAL_DATE_HEADER, original);
    headers.insert(DATE, HeaderValue::from_str(&rendered)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::Method;

    use super::*;
    use crate::cache::{CacheConfig, CacheEntryValue, PageData, PageValue, RenderTree, SetContext};
    use crate::clock::ManualClock;
    use crate::headers::INTERNAL_CACHE_STATUS_HEADER;
    use crate::store::{BlobStore, MemoryStore};

    #[test]
    fn formats_imf_fixdate() {
        assert_eq!(http_date(0).unwrap(), "Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(
            http_date(784_111_777_000).unwrap(),
            "Sun, 06 Nov 1994 08:49:37 GMT"
        );
    }

    fn cached_headers(status: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_CACHE_STATUS_HEADER, HeaderValue::from_static(status));
        headers.insert(DATE, HeaderValue::from_static("Mon, 01 Jan 2024 00:00:00 GMT"));
        headers
    }

    #[tokio::test]
    async fn hit_uses_recorded_last_modified() {
        let mut headers = cached_headers("HIT");
        let snapshot = ContextSnapshot {
            response_cache_get_last_modified: Some(784_111_777_000),
            ..Default::default()
        };

        adjust_date_header(
            &mut headers,
            &RequestInfo::new(Method::GET, "/"),
            Some(&snapshot),
            None,
        )
        .await
        .unwrap();

        assert_eq!(headers[DATE], "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(headers[ORIGINAL_DATE_HEADER], "Mon, 01 Jan 2024 00:00:00 GMT");
    }

    #[tokio::test]
    async fn miss_keeps_wall_clock_date() {
        let mut headers = cached_headers("MISS");
        let snapshot = ContextSnapshot {
            response_cache_get_last_modified: Some(0),
            ..Default::default()
        };

        adjust_date_header(
            &mut headers,
            &RequestInfo::new(Method::GET, "/"),
            Some(&snapshot),
            None,
        )
        .await
        .unwrap();

        assert_eq!(headers[DATE], "Mon, 01 Jan 2024 00:00:00 GMT");
        assert!(!headers.contains_key(ORIGINAL_DATE_HEADER));
    }

    #[tokio::test]
    async fn stale_falls_back_to_a_strong_store_read() {
        let clock = Arc::new(ManualClock::new(784_111_777_000));
        let store = MemoryStore::with_replication_lag(clock.clone(), 60_000);
        let handler = CacheHandler::new(
            BlobStore::new(Arc::new(store)),
            clock,
            CacheConfig::default(),
        );
        handler
            .set(
                "/blog",
                CacheEntryValue::Page(PageValue {
                    html: "<p>blog</p>".into(),
                    page_data: PageData::Props(serde_json::json!({})),
                    headers: None,
                    status: Some(200),
                    tree: RenderTree::Pages,
                }),
                &SetContext::default(),
            )
            .await
            .unwrap();

        let mut headers = cached_headers("STALE");
        adjust_date_header(
            &mut headers,
            &RequestInfo::new(Method::GET, "/blog"),
            None,
            Some(&handler),
        )
        .await
        .unwrap();

        assert_eq!(headers[DATE], "Sun, 06 Nov 1994 08:49:37 GMT");
    }
}
