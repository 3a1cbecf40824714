//! Replays stored page and route artifacts.
//!
//! This is the stand-in for a real renderer: it answers from the cache only,
//! tagging each response with the internal cache verdict for the translator.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::cache::{
    CACHE_TAGS_HEADER, CacheEntry, CacheEntryValue, GetContext, Lookup, Revalidate, StoredHeaders,
};
use crate::headers::{INTERNAL_CACHE_STATUS_HEADER, ONE_YEAR_SECS};

use super::HttpState;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

pub(super) async fn render_artifact(
    State(state): State<HttpState>,
    method: Method,
    uri: Uri,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let path = uri.path();
    let ctx = GetContext::page();
    let lookup = state.handler.lookup(path, &ctx).await;
    let status = lookup.status();

    let entry = match lookup {
        Lookup::Fresh(entry) => entry,
        Lookup::Stale(entry, reason) => {
            debug!(path, ?reason, "serving stale artifact");
            entry
        }
        Lookup::Miss => return miss(),
    };

    let revalidate = state.handler.revalidate_for(path, &entry, &ctx);
    let mut response = match artifact_response(entry, revalidate) {
        Some(response) => response,
        None => return miss(),
    };
    response.headers_mut().insert(
        INTERNAL_CACHE_STATUS_HEADER,
        HeaderValue::from_static(status),
    );
    response
}

fn miss() -> Response {
    let mut response = (StatusCode::NOT_FOUND, "Not Found").into_response();
    response.headers_mut().insert(
        INTERNAL_CACHE_STATUS_HEADER,
        HeaderValue::from_static("MISS"),
    );
    response
}

fn artifact_response(entry: CacheEntry, revalidate: Revalidate) -> Option<Response> {
    let (status, stored, body, content_type, page) = match entry.value {
        CacheEntryValue::Page(page) => (
            page.status.unwrap_or(200),
            page.headers.unwrap_or_default(),
            Body::from(page.html),
            Some(HTML_CONTENT_TYPE),
            true,
        ),
        CacheEntryValue::Route(route) => {
            (route.status, route.headers, Body::from(route.body), None, false)
        }
        CacheEntryValue::Fetch(_) => return None,
    };

    let mut headers = replay_headers(&stored);
    if let Some(content_type) = content_type {
        headers
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static(content_type));
    }
    // Route handlers carry their own revalidate through the request context.
    if page && !headers.contains_key(header::CACHE_CONTROL) {
        let value = match revalidate {
            Revalidate::After(secs) => format!("s-maxage={secs}, stale-while-revalidate"),
            Revalidate::Never => format!("s-maxage={ONE_YEAR_SECS}, stale-while-revalidate"),
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let mut response = (status, body).into_response();
    response.headers_mut().extend(headers);
    Some(response)
}

fn replay_headers(stored: &StoredHeaders) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in stored {
        if name.eq_ignore_ascii_case(CACHE_TAGS_HEADER) {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            debug!(header = %name, "skipping stored header that is not valid http");
            continue;
        };
        headers.append(name, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::cache::{PageData, PageValue, RenderTree, RouteValue};

    fn page(headers: Option<StoredHeaders>) -> CacheEntry {
        CacheEntry {
            key: "server/pages/blog".into(),
            last_modified: 0,
            value: CacheEntryValue::Page(PageValue {
                html: "<h1>blog</h1>".into(),
                page_data: PageData::Props(serde_json::json!({})),
                headers,
                status: None,
                tree: RenderTree::Pages,
            }),
        }
    }

    #[test]
    fn page_without_cache_control_gets_revalidate_period() {
        let response = artifact_response(page(None), Revalidate::After(30)).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "s-maxage=30, stale-while-revalidate"
        );
        assert_eq!(response.headers()[header::CONTENT_TYPE], HTML_CONTENT_TYPE);
    }

    #[test]
    fn stored_tag_header_is_not_replayed() {
        let headers = StoredHeaders::from([
            (CACHE_TAGS_HEADER.to_string(), "posts".to_string()),
            ("cache-control".to_string(), "s-maxage=5".to_string()),
        ]);
        let response = artifact_response(page(Some(headers)), Revalidate::Never).unwrap();
        assert!(!response.headers().contains_key(CACHE_TAGS_HEADER));
        assert_eq!(response.headers()[header::CACHE_CONTROL], "s-maxage=5");
    }

    #[test]
    fn route_replays_status_and_headers() {
        let entry = CacheEntry {
            key: "server/app/api/feed".into(),
            last_modified: 0,
            value: CacheEntryValue::Route(RouteValue {
                body: Bytes::from_static(b"{}"),
                headers: StoredHeaders::from([(
                    "content-type".to_string(),
                    "application/json".to_string(),
                )]),
                status: 201,
                revalidate: Some(Revalidate::After(10)),
            }),
        };
        let response = artifact_response(entry, Revalidate::After(10)).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert!(!response.headers().contains_key(header::CACHE_CONTROL));
    }
}
