//! Per-request cache metadata.
//!
//! A [`RequestContext`] is bound to a request with `tokio::task_local!` so
//! every continuation of that request (including tracked background tasks)
//! sees the same instance, while concurrently handled requests each see
//! their own. The cache handler writes lookup results into it; the header
//! translator reads them back once rendering completes.

mod background;

use std::future::Future;
use std::sync::{Arc, Mutex};

use axum::http::HeaderMap;
use tracing::warn;
use uuid::Uuid;

use crate::cache::Revalidate;
use crate::clock::Timestamp;
use crate::lock::mutex_lock;

pub use background::BackgroundWork;
pub(crate) use background::METRIC_BACKGROUND_SETTLE_MS;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Set by the revalidation trigger when a page is regenerated on demand.
pub const ON_DEMAND_REVALIDATE_HEADER: &str = "x-prerender-revalidate";

tokio::task_local! {
    static REQUEST_CONTEXT: Arc<RequestContext>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingEntry {
    pub name: String,
    pub duration_ms: f64,
    pub description: Option<String>,
}

/// Values recorded while the request was handled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSnapshot {
    pub response_cache_key: Option<String>,
    pub response_cache_get_last_modified: Option<Timestamp>,
    pub response_cache_tags: Option<Vec<String>>,
    pub route_handler_revalidate: Option<Revalidate>,
    pub server_timing: Vec<TimingEntry>,
}

/// What a cache lookup learned about the entry it served.
#[derive(Debug, Clone)]
pub struct CacheLookupRecord {
    pub key: String,
    pub last_modified: Timestamp,
    pub tags: Vec<String>,
    pub route_handler_revalidate: Option<Revalidate>,
}

#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    capture_server_timing: bool,
    did_on_demand_revalidate: bool,
    state: Mutex<ContextSnapshot>,
    background: BackgroundWork,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            capture_server_timing: false,
            did_on_demand_revalidate: false,
            state: Mutex::new(ContextSnapshot::default()),
            background: BackgroundWork::new(),
        }
    }

    /// Build a context from inbound request headers.
    ///
    /// Server timing is captured when `debug_header` is present on the request.
    pub fn from_headers(headers: &HeaderMap, debug_header: &str) -> Self {
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self::new(request_id)
            .with_server_timing(headers.contains_key(debug_header))
            .with_on_demand_revalidate(headers.contains_key(ON_DEMAND_REVALIDATE_HEADER))
    }

    pub fn with_server_timing(mut self, capture: bool) -> Self {
        self.capture_server_timing = capture;
        self
    }

    pub fn with_on_demand_revalidate(mut self, on_demand: bool) -> Self {
        self.did_on_demand_revalidate = on_demand;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn capture_server_timing(&self) -> bool {
        self.capture_server_timing
    }

    pub fn did_on_demand_revalidate(&self) -> bool {
        self.did_on_demand_revalidate
    }

    pub fn background(&self) -> &BackgroundWork {
        &self.background
    }

    pub fn record_cache_lookup(&self, record: CacheLookupRecord) {
        let mut state = mutex_lock(&self.state, "context", "record_cache_lookup");
        state.response_cache_key = Some(record.key);
        state.response_cache_get_last_modified = Some(record.last_modified);
        state.response_cache_tags = (!record.tags.is_empty()).then_some(record.tags);
        if record.route_handler_revalidate.is_some() {
            state.route_handler_revalidate = record.route_handler_revalidate;
        }
    }

    /// Record a server-timing entry; ignored unless capture is enabled.
    pub fn record_timing(
        &self,
        name: impl Into<String>,
        duration_ms: f64,
        description: Option<&str>,
    ) {
        if !self.capture_server_timing {
            return;
        }
        mutex_lock(&self.state, "context", "record_timing")
            .server_timing
            .push(TimingEntry {
                name: name.into(),
                duration_ms,
                description: description.map(str::to_string),
            });
    }

    /// `server-timing` header value for the captured entries.
    pub fn server_timing_header(&self) -> Option<String> {
        if !self.capture_server_timing {
            return None;
        }
        let state = mutex_lock(&self.state, "context", "server_timing_header");
        if state.server_timing.is_empty() {
            return None;
        }

        let rendered = state
            .server_timing
            .iter()
            .map(|entry| {
                let mut metric = format!("{};dur={:.1}", entry.name, entry.duration_ms);
                if let Some(description) = &entry.description {
                    metric.push_str(&format!(";desc=\"{}\"", description.replace('"', "'")));
                }
                metric
            })
            .collect::<Vec<_>>()
            .join(", ");
        Some(rendered)
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        mutex_lock(&self.state, "context", "snapshot").clone()
    }
}

/// Run `future` with `context` as the current request context.
pub async fn run_with_request_context<F>(context: Arc<RequestContext>, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_CONTEXT.scope(context, future).await
}

/// The context of the request being handled, if any.
pub fn get_request_context() -> Option<Arc<RequestContext>> {
    REQUEST_CONTEXT.try_with(Arc::clone).ok()
}

/// Spawn `work` so the current request does not finish before it does.
///
/// The task runs inside the same request scope. Outside a request the task is
/// spawned detached.
pub fn track_background_work<F>(work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match get_request_context() {
        Some(context) => {
            let handle = tokio::spawn(REQUEST_CONTEXT.scope(Arc::clone(&context), work));
            context.background().push(handle);
        }
        None => {
            warn!("background work started outside a request context; running detached");
            tokio::spawn(work);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn from_headers_reads_request_id_and_flags() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-1"));
        headers.insert("x-debug-logging", HeaderValue::from_static("1"));

        let context = RequestContext::from_headers(&headers, "x-debug-logging");
        assert_eq!(context.request_id(), "req-1");
        assert!(context.capture_server_timing());
        assert!(!context.did_on_demand_revalidate());
    }

    #[test]
    fn missing_request_id_gets_a_uuid() {
        let context = RequestContext::from_headers(&HeaderMap::new(), "x-debug-logging");
        assert!(Uuid::parse_str(context.request_id()).is_ok());
        assert!(!context.capture_server_timing());
    }

    #[test]
    fn server_timing_is_only_rendered_when_captured() {
        let silent = RequestContext::new("a");
        silent.record_timing("cache", 1.0, None);
        assert_eq!(silent.server_timing_header(), None);

        let loud = RequestContext::new("b").with_server_timing(true);
        loud.record_timing("cache", 1.5, Some("lookup"));
        loud.record_timing("render", 10.0, None);
        assert_eq!(
            loud.server_timing_header().as_deref(),
            Some("cache;dur=1.5;desc=\"lookup\", render;dur=10.0")
        );
    }

    #[test]
    fn empty_tags_are_not_recorded() {
        let context = RequestContext::new("a");
        context.record_cache_lookup(CacheLookupRecord {
            key: "server/pages/index".into(),
            last_modified: 10,
            tags: Vec::new(),
            route_handler_revalidate: None,
        });

        let snapshot = context.snapshot();
        assert_eq!(snapshot.response_cache_key.as_deref(), Some("server/pages/index"));
        assert_eq!(snapshot.response_cache_get_last_modified, Some(10));
        assert_eq!(snapshot.response_cache_tags, None);
    }

    #[tokio::test]
    async fn context_is_visible_inside_scope_only() {
        assert!(get_request_context().is_none());

        let context = Arc::new(RequestContext::new("scoped"));
        let seen = run_with_request_context(Arc::clone(&context), async {
            tokio::task::yield_now().await;
            get_request_context().map(|ctx| ctx.request_id().to_string())
        })
        .await;

        assert_eq!(seen.as_deref(), Some("scoped"));
        assert!(get_request_context().is_none());
    }

    #[tokio::test]
    async fn tracked_work_inherits_the_request_scope() {
        let context = Arc::new(RequestContext::new("parent"));
        let inherited = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&inherited);
        run_with_request_context(Arc::clone(&context), async move {
            track_background_work(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let same = get_request_context()
                    .is_some_and(|ctx| ctx.request_id() == "parent");
                flag.store(same, Ordering::SeqCst);
            });
        })
        .await;

        assert_eq!(context.background().pending(), 1);
        context.background().settle().await;
        assert!(inherited.load(Ordering::SeqCst));
    }
}
