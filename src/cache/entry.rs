//! Cache entry and artifact types.
//!
//! Persisted shape: `{ "lastModified": <ms>, "value": { "kind": "PAGE" | "ROUTE" | "FETCH", ... } }`.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::clock::Timestamp;

/// Header map as persisted alongside an artifact.
pub type StoredHeaders = BTreeMap<String, String>;

/// Header carrying the comma-separated tags of a page or route artifact.
pub const CACHE_TAGS_HEADER: &str = "x-render-cache-tags";

/// Time-based revalidation period: `false` (never) or a number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revalidate {
    Never,
    After(u64),
}

impl Revalidate {
    /// Absolute expiry for an entry written at `last_modified`, if any.
    pub fn expires_at(self, last_modified: Timestamp) -> Option<Timestamp> {
        match self {
            Revalidate::Never => None,
            Revalidate::After(secs) => {
                let secs = i64::try_from(secs).unwrap_or(i64::MAX / 1000);
                Some(last_modified.saturating_add(secs.saturating_mul(1000)))
            }
        }
    }

    pub fn seconds(self) -> Option<u64> {
        match self {
            Revalidate::Never => None,
            Revalidate::After(secs) => Some(secs),
        }
    }
}

impl Serialize for Revalidate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Revalidate::Never => serializer.serialize_bool(false),
            Revalidate::After(secs) => serializer.serialize_u64(*secs),
        }
    }
}

impl<'de> Deserialize<'de> for Revalidate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Seconds(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(false) => Ok(Revalidate::Never),
            Raw::Flag(true) => Err(serde::de::Error::custom(
                "revalidate must be `false` or a number of seconds",
            )),
            Raw::Seconds(secs) => Ok(Revalidate::After(secs)),
        }
    }
}

/// Which rendering tree produced a page artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderTree {
    #[default]
    Pages,
    App,
}

/// Payload shipped next to the HTML: a serialised flight payload (app tree)
/// or a props object (pages tree).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageData {
    Flight(String),
    Props(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageValue {
    pub html: String,
    pub page_data: PageData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<StoredHeaders>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub tree: RenderTree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteValue {
    #[serde(with = "base64_body")]
    pub body: Bytes,
    #[serde(default)]
    pub headers: StoredHeaders,
    pub status: u16,
    /// Revalidate value the route handler was stored with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revalidate: Option<Revalidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchData {
    #[serde(default)]
    pub headers: StoredHeaders,
    pub body: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchValue {
    pub data: FetchData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revalidate: Option<Revalidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum CacheEntryValue {
    Page(PageValue),
    Route(RouteValue),
    Fetch(FetchValue),
}

impl CacheEntryValue {
    pub fn kind(&self) -> &'static str {
        match self {
            CacheEntryValue::Page(_) => "PAGE",
            CacheEntryValue::Route(_) => "ROUTE",
            CacheEntryValue::Fetch(_) => "FETCH",
        }
    }

    /// Tags declared through the stored tag header (pages and routes only).
    pub fn header_tags(&self) -> Vec<String> {
        let headers = match self {
            CacheEntryValue::Page(page) => page.headers.as_ref(),
            CacheEntryValue::Route(route) => Some(&route.headers),
            CacheEntryValue::Fetch(_) => None,
        };
        headers
            .and_then(|headers| lookup_header(headers, CACHE_TAGS_HEADER))
            .map(split_tags)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Storage key the entry was read from; not persisted.
    #[serde(skip)]
    pub key: String,
    pub last_modified: Timestamp,
    pub value: CacheEntryValue,
}

fn lookup_header<'a>(headers: &'a StoredHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

mod base64_body {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
