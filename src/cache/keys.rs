//! Storage key derivation.
//!
//! Logical keys are route paths (`/blog/post`) or fetch hashes. Each artifact
//! kind lives in its own namespace so a pages-tree route and an app-tree route
//! sharing a path never collide.

use std::fmt;

pub const PAGES_NAMESPACE: &str = "server/pages";
pub const APP_NAMESPACE: &str = "server/app";
pub const FETCH_NAMESPACE: &str = "cache/fetch-cache";

/// Prefix of the tag implicitly attached to every page/route artifact.
pub const IMPLICIT_TAG_PREFIX: &str = "_N_T_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Pages,
    App,
    Fetch,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Pages => PAGES_NAMESPACE,
            Namespace::App => APP_NAMESPACE,
            Namespace::Fetch => FETCH_NAMESPACE,
        }
    }
}

/// A namespaced storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: Namespace,
    logical: String,
}

impl CacheKey {
    pub fn page(route: &str) -> Self {
        Self {
            namespace: Namespace::Pages,
            logical: normalize_route(route),
        }
    }

    pub fn app(route: &str) -> Self {
        Self {
            namespace: Namespace::App,
            logical: normalize_route(route),
        }
    }

    pub fn fetch(hash: &str) -> Self {
        Self {
            namespace: Namespace::Fetch,
            logical: hash.trim_matches('/').to_string(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Normalised logical key (route for pages/app, hash for fetches).
    pub fn logical(&self) -> &str {
        &self.logical
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace {
            Namespace::Fetch => write!(f, "{}/{}", self.namespace.prefix(), self.logical),
            _ => write!(f, "{}{}", self.namespace.prefix(), self.logical),
        }
    }
}

/// Normalise a route: leading slash, no trailing slash, root stored as `/index`.
pub fn normalize_route(route: &str) -> String {
    let trimmed = route.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/index".to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Path form of a route: `/index` maps back to `/`.
pub fn route_path(route: &str) -> String {
    let normalized = normalize_route(route);
    if normalized == "/index" {
        "/".to_string()
    } else {
        normalized
    }
}

pub fn implicit_tag(route: &str) -> String {
    format!("{IMPLICIT_TAG_PREFIX}{}", route_path(route))
}
