//! Incremental rendering cache and tag-based revalidation engine.
//!
//! Decides whether a previously rendered artifact may be reused, expires it by
//! TTL or by tag, and translates the decision into shared-cache response headers.

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod headers;
pub mod infra;
mod lock;
pub mod store;
