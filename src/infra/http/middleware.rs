use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use tracing::{Instrument, Span, debug, error, field, instrument, warn};

use crate::context::{REQUEST_ID_HEADER, RequestContext, run_with_request_context};
use crate::headers::RequestInfo;

use super::HttpState;
use super::error::ErrorReport;

/// Scope the request in a fresh [`RequestContext`], translate the rendered
/// headers for the shared cache, and hold the end of the body until the
/// request's background work has settled.
#[instrument(
    name = "request",
    skip_all,
    fields(request_id = field::Empty, method = %request.method(), path = %request.uri().path())
)]
pub async fn cache_headers_layer(
    State(state): State<HttpState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let debug_header = state.translator.config().debug_header.clone();
    let context = Arc::new(RequestContext::from_headers(
        request.headers(),
        debug_header.as_str(),
    ));
    Span::current().record("request_id", context.request_id());

    let info = RequestInfo::new(request.method().clone(), request.uri().path());
    request.extensions_mut().insert(Arc::clone(&context));

    let mut response = run_with_request_context(Arc::clone(&context), next.run(request)).await;

    state
        .translator
        .translate(response.headers_mut(), &info, Some(&context))
        .await;

    if let Ok(value) = HeaderValue::from_str(context.request_id()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let pending = context.background().pending();
    if pending == 0 {
        return response;
    }

    debug!(pending, "deferring end of body until background work settles");
    defer_until_settled(response, context)
}

fn defer_until_settled(response: Response, context: Arc<RequestContext>) -> Response {
    let (parts, body) = response.into_parts();
    let span = Span::current();
    let stream = async_stream::stream! {
        let mut body = body;
        while let Some(frame) = body.frame().await {
            match frame {
                Ok(frame) => {
                    if let Ok(data) = frame.into_data() {
                        yield Ok(data);
                    }
                }
                Err(err) => {
                    yield Err(err);
                    break;
                }
            }
        }
        context.background().settle().instrument(span).await;
    };
    Response::from_parts(parts, Body::from_stream(stream))
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<Arc<RequestContext>>()
        .map(|context| context.request_id().to_string())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "revalidator::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request failed",
            );
        } else if report_source_is_known(source) {
            warn!(
                target = "revalidator::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                request_id = request_id,
                "client request error",
            );
        }
    }

    response
}

// Cache misses answer 404 without a report; they are not worth a warning.
fn report_source_is_known(source: &str) -> bool {
    source != "unknown"
}
