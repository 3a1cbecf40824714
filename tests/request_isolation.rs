use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use revalidator::cache::{
    CacheConfig, CacheEntryValue, CacheHandler, GetContext, PageData, PageValue, RenderTree,
    SetContext,
};
use revalidator::clock::ManualClock;
use revalidator::context::{
    RequestContext, get_request_context, run_with_request_context, track_background_work,
};
use revalidator::store::{
    BlobStore, Consistency, ListEntry, MemoryStore, ObjectStore, StoreError, StoredObject,
};
use tokio::sync::Barrier;

/// Holds every page read until two are in flight at once.
struct GatedStore {
    inner: MemoryStore,
    gate: Barrier,
}

#[async_trait]
impl ObjectStore for GatedStore {
    async fn get_with_metadata(
        &self,
        key: &str,
        consistency: Consistency,
    ) -> Result<Option<StoredObject>, StoreError> {
        if key.starts_with("server/") {
            self.gate.wait().await;
        }
        self.inner.get_with_metadata(key, consistency).await
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, StoreError> {
        self.inner.list(prefix).await
    }
}

fn page(html: &str) -> CacheEntryValue {
    CacheEntryValue::Page(PageValue {
        html: html.to_string(),
        page_data: PageData::Props(serde_json::json!({})),
        headers: None,
        status: Some(200),
        tree: RenderTree::Pages,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_requests_record_into_their_own_context() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = Arc::new(GatedStore {
        inner: MemoryStore::new(clock.clone()),
        gate: Barrier::new(2),
    });
    let handler = CacheHandler::new(BlobStore::new(store), clock.clone(), CacheConfig::default());

    // Seed without going through the gate.
    handler
        .set("/first", page("first"), &SetContext::default())
        .await
        .unwrap();
    clock.advance_ms(500);
    handler
        .set("/second", page("second"), &SetContext::default())
        .await
        .unwrap();

    let first = Arc::new(RequestContext::new("req-first"));
    let second = Arc::new(RequestContext::new("req-second"));

    let first_task = tokio::spawn(run_with_request_context(Arc::clone(&first), {
        let handler = handler.clone();
        async move { handler.get("/first", &GetContext::page()).await }
    }));
    let second_task = tokio::spawn(run_with_request_context(Arc::clone(&second), {
        let handler = handler.clone();
        async move { handler.get("/second", &GetContext::page()).await }
    }));

    let (first_hit, second_hit) = tokio::time::timeout(Duration::from_secs(5), async {
        (first_task.await.unwrap(), second_task.await.unwrap())
    })
    .await
    .expect("both lookups should pass the gate together");
    assert!(first_hit.is_some());
    assert!(second_hit.is_some());

    let first = first.snapshot();
    let second = second.snapshot();
    assert_eq!(first.response_cache_key.as_deref(), Some("server/pages/first"));
    assert_eq!(first.response_cache_get_last_modified, Some(1_000));
    assert_eq!(
        first.response_cache_tags,
        Some(vec!["_N_T_/first".to_string()])
    );
    assert_eq!(second.response_cache_key.as_deref(), Some("server/pages/second"));
    assert_eq!(second.response_cache_get_last_modified, Some(1_500));
    assert_eq!(
        second.response_cache_tags,
        Some(vec!["_N_T_/second".to_string()])
    );
}

#[tokio::test]
async fn background_work_stays_in_the_request_scope() {
    let context = Arc::new(RequestContext::new("req-bg"));
    let observed = Arc::new(AtomicBool::new(false));

    run_with_request_context(Arc::clone(&context), {
        let observed = Arc::clone(&observed);
        async move {
            track_background_work(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let inherited = get_request_context()
                    .is_some_and(|inner| inner.request_id() == "req-bg");
                observed.store(inherited, Ordering::SeqCst);
            });
        }
    })
    .await;

    assert_eq!(context.background().pending(), 1);
    context.background().settle().await;
    assert_eq!(context.background().pending(), 0);
    assert!(observed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn lookups_outside_a_request_record_nothing() {
    let clock = Arc::new(ManualClock::new(0));
    let handler = CacheHandler::new(
        BlobStore::new(Arc::new(MemoryStore::new(clock.clone()))),
        clock,
        CacheConfig::default(),
    );
    handler
        .set("/lonely", page("lonely"), &SetContext::default())
        .await
        .unwrap();

    assert!(get_request_context().is_none());
    assert!(handler.get("/lonely", &GetContext::page()).await.is_some());
}
