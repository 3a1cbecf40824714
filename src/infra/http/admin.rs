use std::collections::HashSet;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::cache::{CacheEntryValue, Revalidate, SetContext, TagManifestEntry};

use super::HttpState;
use super::error::HttpError;

const SOURCE: &str = "infra::http::admin";

#[derive(Debug, Deserialize)]
pub(super) struct RevalidateRequest {
    tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct RevalidateResponse {
    revalidated: Vec<String>,
    now: i64,
}

#[derive(Debug, Serialize)]
pub(super) struct TagsResponse {
    tags: Vec<TagManifestEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ArtifactQuery {
    /// `false` or a number of seconds.
    revalidate: Option<String>,
}

impl ArtifactQuery {
    fn revalidate(&self) -> Result<Option<Revalidate>, HttpError> {
        let Some(raw) = self.revalidate.as_deref() else {
            return Ok(None);
        };
        match raw.trim() {
            "false" => Ok(Some(Revalidate::Never)),
            secs => secs
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(|secs| Some(Revalidate::After(secs)))
                .ok_or_else(|| {
                    HttpError::new(
                        SOURCE,
                        StatusCode::BAD_REQUEST,
                        "Invalid revalidate value",
                        format!("`{raw}` is neither `false` nor a positive number of seconds"),
                    )
                }),
        }
    }
}

pub(super) async fn revalidate(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(request): Json<RevalidateRequest>,
) -> Result<Json<RevalidateResponse>, HttpError> {
    authorize(&state, &headers)?;

    let mut seen = HashSet::new();
    let tags: Vec<String> = request
        .tags
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect();
    if tags.is_empty() {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "At least one tag is required",
            "revalidate request carried no tags",
        ));
    }

    state.handler.revalidate_tags(&tags).await?;
    info!(tags = ?tags, "tags revalidated on demand");

    Ok(Json(RevalidateResponse {
        revalidated: tags,
        now: state.handler.now(),
    }))
}

pub(super) async fn list_tags(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<Json<TagsResponse>, HttpError> {
    authorize(&state, &headers)?;

    let tags = state.handler.tag_manifest().entries().await.map_err(|err| {
        HttpError::from_error(
            SOURCE,
            StatusCode::SERVICE_UNAVAILABLE,
            "Tag manifest unavailable",
            &err,
        )
    })?;
    Ok(Json(TagsResponse { tags }))
}

pub(super) async fn put_artifact(
    State(state): State<HttpState>,
    Path(route): Path<String>,
    Query(query): Query<ArtifactQuery>,
    headers: HeaderMap,
    Json(value): Json<CacheEntryValue>,
) -> Result<Response, HttpError> {
    authorize(&state, &headers)?;

    let ctx = SetContext {
        revalidate: query.revalidate()?,
        tags: Vec::new(),
    };
    state.handler.spawn_set(format!("/{route}"), value, ctx);
    Ok(StatusCode::ACCEPTED.into_response())
}

pub(super) async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn authorize(state: &HttpState, headers: &HeaderMap) -> Result<(), HttpError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();

    if expected.as_bytes().ct_eq(provided.as_bytes()).unwrap_u8() == 0 {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "missing or invalid admin token",
        ));
    }
    Ok(())
}
