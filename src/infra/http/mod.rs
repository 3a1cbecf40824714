//! HTTP surface: artifact replay, admin endpoints and the shared-cache
//! header layer that wraps both.

mod admin;
pub mod error;
mod middleware;
mod renderer;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};

use crate::cache::CacheHandler;
use crate::headers::HeaderTranslator;

pub use middleware::{cache_headers_layer, log_responses};

#[derive(Clone)]
pub struct HttpState {
    pub handler: CacheHandler,
    pub translator: HeaderTranslator,
    pub admin_token: Option<Arc<str>>,
}

impl HttpState {
    pub fn new(handler: CacheHandler, translator: HeaderTranslator) -> Self {
        Self {
            handler,
            translator,
            admin_token: None,
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.map(Arc::from);
        self
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/_revalidate", post(admin::revalidate))
        .route("/_tags", get(admin::list_tags))
        .route("/_artifacts/{*route}", put(admin::put_artifact))
        .route("/healthz", get(admin::health))
        .fallback(renderer::render_artifact)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            cache_headers_layer,
        ))
        .with_state(state)
}
