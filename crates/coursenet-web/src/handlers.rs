//! Request dispatcher
//!
//! Resource endpoints: derive key → check cache → hit responds, miss is a
//! terminal NotFound. Computation endpoints skip the cache and delegate.

use crate::error::ApiError;
use crate::AppState;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use coursenet_core::keys::{is_course_slug, is_tree_segment};
use coursenet_core::{CacheKey, SearchQuery, SimilarityRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

type ApiResult = Result<Json<Value>, ApiError>;

/// Route map
pub async fn index() -> Json<Value> {
    Json(json!({
        "/nav": "Navigation tree and autocomplete entries",
        "/epfl": {
            "/": "Root of EPFL coursebook tree",
            "/:level": "Academic level",
            "/:level/:program": "Study program",
            "/master/:program/:specialization": "Master specialization"
        },
        "/course/:slug": "Detailed course information",
        "/course/search?query=<text>&topk=<int>": "Keyword search over courses",
        "/simlinks": "POST {threshold, slugs}: similarity links between courses"
    }))
}

pub async fn nav(State(state): State<Arc<AppState>>) -> ApiResult {
    resolve(&state, CacheKey::nav()).await
}

pub async fn epfl_root(State(state): State<Arc<AppState>>) -> ApiResult {
    resolve(&state, CacheKey::epfl(None, None, None)).await
}

/// `/epfl/{level}[/{program}[/{specialization}]]`
pub async fn epfl_node(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
) -> ApiResult {
    let level = params.get("level").map(String::as_str);
    let program = params.get("program").map(String::as_str);
    let specialization = params.get("specialization").map(String::as_str);

    if ![level, program, specialization]
        .into_iter()
        .flatten()
        .all(is_tree_segment)
    {
        return Err(ApiError::NotFound);
    }

    resolve(&state, CacheKey::epfl(level, program, specialization)).await
}

pub async fn course(State(state): State<Arc<AppState>>, Path(slug): Path<String>) -> ApiResult {
    if !is_course_slug(&slug) {
        return Err(ApiError::NotFound);
    }
    resolve(&state, CacheKey::course(&slug)).await
}

/// Cache hit responds with the stored document; a miss ends in NotFound
async fn resolve(state: &AppState, key: CacheKey) -> ApiResult {
    debug!(key = %key, "Resolving cached resource");
    match state.cache.lookup(&key).await? {
        Some(value) => Ok(Json(value)),
        None => {
            info!(key = %key, "Cache miss, not found");
            Err(ApiError::NotFound)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    query: Option<String>,
    topk: Option<String>,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult {
    let Query(params) = params.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Unreadable search parameters");
        ApiError::bad_request("Invalid parameters")
    })?;
    info!(query = ?params.query, topk = ?params.topk, "Course search");

    let query = params
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Parameter <query> is missing"))?;

    let topk = match params.topk.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<usize>()
                .map_err(|_| ApiError::bad_request("Parameter <topk> must be an integer"))?,
        ),
    };

    let result = state.compute.search(&SearchQuery::new(query, topk)).await?;
    Ok(Json(result))
}

pub async fn simlinks(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let request = parse_similarity_request(&body)
        .ok_or_else(|| ApiError::bad_request("Invalid parameters"))?;

    info!(threshold = request.threshold, slugs = ?request.slugs, "Similarity links");

    let result = state.compute.simlinks(&request).await?;
    Ok(Json(result))
}

/// `{threshold, slugs}` with a non-zero numeric threshold and an array of slugs
///
/// Slugs are held to the course-slug alphabet so they cannot break the
/// `threshold#slug,slug` frame.
fn parse_similarity_request(body: &[u8]) -> Option<SimilarityRequest> {
    let value: Value = serde_json::from_slice(body).ok()?;

    let threshold = value.get("threshold")?.as_f64()?;
    if threshold == 0.0 || !threshold.is_finite() {
        return None;
    }

    let slugs = value
        .get("slugs")?
        .as_array()?
        .iter()
        .map(|slug| slug.as_str().filter(|s| is_course_slug(s)).map(str::to_string))
        .collect::<Option<Vec<_>>>()?;

    Some(SimilarityRequest::new(threshold, slugs))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
