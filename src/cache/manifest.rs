//! Build-time manifests: route TTLs and path tags.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use super::entry::Revalidate;
use super::keys::{normalize_route, route_path};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest `{path}`: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerenderRoute {
    pub initial_revalidate_seconds: Revalidate,
}

/// Route → initial revalidate period, as emitted by the build.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrerenderManifest {
    #[serde(default)]
    routes: HashMap<String, PrerenderRoute>,
}

impl PrerenderManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        read_json(path)
    }

    pub fn from_routes<I>(routes: I) -> Self
    where
        I: IntoIterator<Item = (String, Revalidate)>,
    {
        Self {
            routes: routes
                .into_iter()
                .map(|(route, revalidate)| {
                    (
                        route_path(&route),
                        PrerenderRoute {
                            initial_revalidate_seconds: revalidate,
                        },
                    )
                })
                .collect(),
        }
    }

    /// TTL recorded for `route`; manifest routes are keyed by path form (`/`, `/blog`).
    pub fn revalidate_for(&self, route: &str) -> Option<Revalidate> {
        self.routes
            .get(&route_path(route))
            .or_else(|| self.routes.get(&normalize_route(route)))
            .map(|route| route.initial_revalidate_seconds)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Request path → cache tags for the shared cache.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TagsManifest {
    paths: HashMap<String, Vec<String>>,
}

impl TagsManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        read_json(path)
    }

    pub fn from_paths<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        Self {
            paths: paths.into_iter().collect(),
        }
    }

    pub fn tags_for_path(&self, path: &str) -> Option<&[String]> {
        self.paths
            .get(path)
            .map(Vec::as_slice)
            .filter(|tags| !tags.is_empty())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ManifestError> {
    let display = path.display().to_string();
    let raw = std::fs::read(path).map_err(|source| ManifestError::Read {
        path: display.clone(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| ManifestError::Parse {
        path: display,
        source,
    })
}
