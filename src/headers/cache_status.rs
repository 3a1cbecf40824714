use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use super::{HeaderConfig, HeaderError, INTERNAL_CACHE_STATUS_HEADER};

pub const CACHE_STATUS: HeaderName = HeaderName::from_static("cache-status");

/// Internal cache verdict reported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
}

impl CacheStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HIT" => Some(Self::Hit),
            "MISS" => Some(Self::Miss),
            "STALE" => Some(Self::Stale),
            _ => None,
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(INTERNAL_CACHE_STATUS_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(Self::parse)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Stale => "STALE",
        }
    }

    /// Served from a stored entry.
    pub fn is_cached(self) -> bool {
        matches!(self, Self::Hit | Self::Stale)
    }

    fn directive(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "fwd=miss",
            Self::Stale => "hit; fwd=stale",
        }
    }
}

/// Replace the internal status header with a public `Cache-Status` entry.
pub(crate) fn handle_cache_status_header(
    headers: &mut HeaderMap,
    config: &HeaderConfig,
) -> Result<(), HeaderError> {
    let Some(internal) = headers.remove(INTERNAL_CACHE_STATUS_HEADER) else {
        return Ok(());
    };

    match internal.to_str().ok().and_then(CacheStatus::parse) {
        Some(status) => {
            let value = format!("\"{}\"; {}", config.engine_name, status.directive());
            headers.append(CACHE_STATUS, HeaderValue::from_str(&value)?);
        }
        None => debug!(value = ?internal, "unrecognised internal cache status dropped"),
    }
    Ok(())
}
