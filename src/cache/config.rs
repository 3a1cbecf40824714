//! Cache handler configuration.
//!
//! Controls namespace probing and the fallback TTL via `revalidator.toml`.

use serde::Deserialize;

use super::entry::Revalidate;

/// Cache configuration from `revalidator.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Probe the app-tree namespace after the pages-tree namespace.
    pub app_tree: bool,
    /// TTL for routes without a prerender manifest entry; `None` never expires.
    pub default_revalidate_seconds: Option<u64>,
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            app_tree: settings.app_tree,
            default_revalidate_seconds: settings.default_revalidate_seconds,
        }
    }
}

impl CacheConfig {
    /// Fallback revalidate period when neither the caller, the entry nor the
    /// prerender manifest name one.
    pub fn default_revalidate(&self) -> Revalidate {
        self.default_revalidate_seconds
            .map_or(Revalidate::Never, Revalidate::After)
    }
}
