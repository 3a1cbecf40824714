use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use revalidator::cache::{CacheConfig, CacheHandler};
use revalidator::clock::ManualClock;
use revalidator::headers::{HeaderConfig, HeaderTranslator, http_date};
use revalidator::infra::http::{HttpState, build_router};
use revalidator::store::{BlobStore, MemoryStore};
use serde_json::{Value, json};
use tower::ServiceExt;

const T0: i64 = 1_700_000_000_000;
const TOKEN: &str = "s3cret";

struct Harness {
    router: Router,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(T0));
    let store = MemoryStore::new(clock.clone());
    let handler = CacheHandler::new(
        BlobStore::new(Arc::new(store)),
        clock.clone(),
        CacheConfig::default(),
    );
    let translator = HeaderTranslator::new(HeaderConfig::default()).with_handler(handler.clone());
    let state = HttpState::new(handler, translator).with_admin_token(Some(TOKEN.to_string()));
    Harness {
        router: build_router(state),
        clock,
    }
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response: Response = self.router.clone().oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        (parts.status, parts.headers, bytes.to_vec())
    }

    async fn get(&self, path: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
        self.send(Request::get(path).body(Body::empty()).unwrap())
            .await
    }

    async fn put_page(&self, route: &str, html: &str) -> StatusCode {
        let body = json!({
            "kind": "PAGE",
            "html": html,
            "pageData": { "title": html },
            "status": 200,
            "tree": "pages",
        });
        let request = Request::builder()
            .method(Method::PUT)
            .uri(format!("/_artifacts/{route}"))
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await.0
    }

    async fn revalidate(&self, tags: &[&str]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/_revalidate")
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "tags": tags }).to_string()))
            .unwrap();
        let (status, _, body) = self.send(request).await;
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn stored_page_is_served_with_shared_cache_headers() {
    let harness = harness();
    assert_eq!(harness.put_page("blog", "<h1>blog</h1>").await, StatusCode::ACCEPTED);

    harness.clock.advance_secs(2);
    let (status, headers, body) = harness.get("/blog").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<h1>blog</h1>");
    assert_eq!(header_str(&headers, "cache-status"), "\"revalidator\"; hit");
    assert_eq!(
        header_str(&headers, "cache-control"),
        "public, max-age=0, must-revalidate"
    );
    assert_eq!(
        header_str(&headers, "netlify-cdn-cache-control"),
        "s-maxage=31536000, stale-while-revalidate=31536000"
    );
    assert_eq!(header_str(&headers, "cache-tag"), "_N_T_/blog");
    assert_eq!(header_str(&headers, "date"), http_date(T0).unwrap());
    assert!(!headers.contains_key("x-render-cache"));
    assert!(header_str(&headers, "netlify-vary").contains("cookie=__prerender_bypass"));
}

#[tokio::test]
async fn missing_artifact_reports_a_miss() {
    let harness = harness();
    let (status, headers, _) = harness.get("/nowhere").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(header_str(&headers, "cache-status"), "\"revalidator\"; fwd=miss");
    assert!(!headers.contains_key("cache-tag"));
}

#[tokio::test]
async fn revalidated_tag_turns_a_hit_stale() {
    let harness = harness();
    harness.put_page("posts/hello", "<p>hello</p>").await;

    harness.clock.advance_secs(1);
    let (status, body) = harness.revalidate(&["_N_T_/posts/hello", ""]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revalidated"], json!(["_N_T_/posts/hello"]));
    assert_eq!(body["now"], json!(T0 + 1_000));

    let (status, headers, body) = harness.get("/posts/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<p>hello</p>");
    assert_eq!(
        header_str(&headers, "cache-status"),
        "\"revalidator\"; hit; fwd=stale"
    );

    let (status, _, body) = harness.get("/_tags").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, b"Unauthorized");

    let request = Request::get("/_tags")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = harness.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let listing: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        listing["tags"],
        json!([{ "tag": "_N_T_/posts/hello", "revalidatedAt": T0 + 1_000 }])
    );
}

#[tokio::test]
async fn admin_requests_require_the_token() {
    let harness = harness();
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/_artifacts/blog")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "kind": "PAGE", "html": "", "pageData": {} }).to_string(),
        ))
        .unwrap();
    let (status, _, _) = harness.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = harness.revalidate(&[" "]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn request_id_and_server_timing_are_echoed() {
    let harness = harness();
    harness.put_page("timed", "<p>timed</p>").await;

    let request = Request::get("/timed")
        .header("x-request-id", "req-42")
        .header("x-debug-logging", "1")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = harness.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "x-request-id"), "req-42");
    assert!(header_str(&headers, "server-timing").starts_with("cache;dur="));
    assert!(header_str(&headers, "server-timing").ends_with("desc=\"HIT\""));
}

#[tokio::test]
async fn health_check_answers_no_content() {
    let harness = harness();
    let (status, headers, _) = harness.get("/healthz").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!headers.contains_key("cache-status"));
}
