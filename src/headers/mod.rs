//! Response header translation for the shared cache.
//!
//! Runs once per response after rendering. Each step reads the request
//! context and the rendered headers and rewrites one concern; a step that
//! fails leaves its headers as they were and the others still run.

mod cache_control;
mod cache_status;
mod cache_tags;
mod date;
mod directives;
mod vary;

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, header::ToStrError};
use thiserror::Error;
use tracing::warn;

use crate::cache::{CacheHandler, TagsManifest};
use crate::config::HeaderSettings;
use crate::context::{ContextSnapshot, RequestContext};

pub use cache_control::{DEFAULT_CLIENT_CACHE_CONTROL, ONE_YEAR_SECS};
pub use cache_status::{CACHE_STATUS, CacheStatus};
pub use date::http_date;
pub use vary::{LOCALE_COOKIE, PREVIEW_BYPASS_COOKIE, PREVIEW_DATA_COOKIE};

/// Cache verdict set by the renderer; never sent to clients.
pub const INTERNAL_CACHE_STATUS_HEADER: &str = "x-render-cache";
/// The `date` the renderer produced before it was rewritten.
pub const ORIGINAL_DATE_HEADER: &str = "x-render-date";
/// Targeted cache-control header honoured by most CDNs.
pub const CDN_CACHE_CONTROL: &str = "cdn-cache-control";
pub const SERVER_TIMING: &str = "server-timing";

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("invalid header value: {0}")]
    InvalidValue(#[from] axum::http::header::InvalidHeaderValue),
    #[error("header is not visible ascii: {0}")]
    NotAscii(#[from] ToStrError),
    #[error("timestamp {0} cannot be rendered as an http date")]
    InvalidTimestamp(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I18nConfig {
    pub locales: Vec<String>,
    pub locale_detection: bool,
}

#[derive(Debug, Clone)]
pub struct HeaderConfig {
    pub shared_cache_control: HeaderName,
    pub shared_vary: HeaderName,
    pub cache_tag: HeaderName,
    pub debug_header: HeaderName,
    pub engine_name: String,
    pub base_path: Option<String>,
    pub i18n: Option<I18nConfig>,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            shared_cache_control: HeaderName::from_static("netlify-cdn-cache-control"),
            shared_vary: HeaderName::from_static("netlify-vary"),
            cache_tag: HeaderName::from_static("cache-tag"),
            debug_header: HeaderName::from_static("x-debug-logging"),
            engine_name: "revalidator".to_string(),
            base_path: None,
            i18n: None,
        }
    }
}

impl From<&HeaderSettings> for HeaderConfig {
    fn from(settings: &HeaderSettings) -> Self {
        let i18n = (!settings.locales.is_empty()).then(|| I18nConfig {
            locales: settings.locales.clone(),
            locale_detection: settings.locale_detection,
        });

        Self {
            shared_cache_control: settings.shared_cache_control.clone(),
            shared_vary: settings.shared_vary.clone(),
            cache_tag: settings.cache_tag.clone(),
            debug_header: settings.debug_header.clone(),
            engine_name: settings.engine_name.clone(),
            base_path: settings.base_path.clone(),
            i18n,
        }
    }
}

/// The parts of the inbound request the translator looks at.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
}

impl RequestInfo {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    pub fn is_cacheable_method(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

#[derive(Clone)]
pub struct HeaderTranslator {
    config: Arc<HeaderConfig>,
    handler: Option<CacheHandler>,
    tags_manifest: Arc<TagsManifest>,
}

impl HeaderTranslator {
    pub fn new(config: HeaderConfig) -> Self {
        Self {
            config: Arc::new(config),
            handler: None,
            tags_manifest: Arc::new(TagsManifest::default()),
        }
    }

    /// Handler used for the strongly consistent `date` fallback read.
    pub fn with_handler(mut self, handler: CacheHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_tags_manifest(mut self, manifest: TagsManifest) -> Self {
        self.tags_manifest = Arc::new(manifest);
        self
    }

    pub fn config(&self) -> &HeaderConfig {
        &self.config
    }

    /// Rewrite `headers` for the shared cache. Never fails the response.
    pub async fn translate(
        &self,
        headers: &mut HeaderMap,
        request: &RequestInfo,
        context: Option<&RequestContext>,
    ) {
        let snapshot: Option<ContextSnapshot> = context.map(RequestContext::snapshot);
        let snapshot = snapshot.as_ref();

        best_effort(
            "date",
            date::adjust_date_header(headers, request, snapshot, self.handler.as_ref()).await,
        );
        best_effort(
            "cache_control",
            cache_control::set_cache_control_headers(headers, request, snapshot, &self.config),
        );
        best_effort(
            "cache_tags",
            cache_tags::set_cache_tags_headers(
                headers,
                request,
                snapshot,
                &self.tags_manifest,
                &self.config,
            ),
        );
        best_effort(
            "vary",
            vary::set_vary_headers(headers, request, &self.config),
        );
        best_effort(
            "cache_status",
            cache_status::handle_cache_status_header(headers, &self.config),
        );
        best_effort(
            "server_timing",
            set_server_timing_header(headers, context),
        );
    }
}

fn set_server_timing_header(
    headers: &mut HeaderMap,
    context: Option<&RequestContext>,
) -> Result<(), HeaderError> {
    if let Some(timing) = context.and_then(RequestContext::server_timing_header) {
        headers.append(SERVER_TIMING, HeaderValue::from_str(&timing)?);
    }
    Ok(())
}

fn best_effort(step: &'static str, result: Result<(), HeaderError>) {
    if let Err(err) = result {
        warn!(step, error = %err, "header translation step skipped");
    }
}
