//! HTTP request handlers.

use super::AppState;
use crate::canon;
use crate::db::{StoreError, Target};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_LIMIT: usize = 10;

// ============================================================================
// POST /v1/targets
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct TargetResponse {
    pub id: String,
    pub url: String,
    pub created_at: String,
}

impl From<Target> for TargetResponse {
    fn from(t: Target) -> Self {
        Self {
            id: t.id,
            url: t.url,
            created_at: t.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateTargetRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(json) => json,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let canonical = match canon::canonicalize(&req.url) {
        Ok(url) => url,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match state.store.create_target(&canonical, idempotency_key) {
        Ok((target, true)) => {
            (StatusCode::CREATED, Json(TargetResponse::from(target))).into_response()
        }
        Ok((target, false)) => (StatusCode::OK, Json(TargetResponse::from(target))).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// GET /v1/targets
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListTargetsQuery {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub page_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TargetItem {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ListTargetsResponse {
    pub items: Vec<TargetItem>,
    /// Opaque cursor; empty on the last page.
    pub next_page_token: String,
}

pub async fn handle_list_targets(
    State(state): State<AppState>,
    Query(query): Query<ListTargetsQuery>,
) -> Response {
    let host = query.host.unwrap_or_default();
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);

    match state
        .store
        .list_targets(&host, limit, query.page_token.as_deref())
    {
        Ok((items, next)) => {
            let items = items
                .into_iter()
                .map(|t| TargetItem { id: t.id, url: t.url })
                .collect();
            Json(ListTargetsResponse {
                items,
                next_page_token: next.unwrap_or_default(),
            })
            .into_response()
        }
        Err(StoreError::InvalidPageToken) => {
            (StatusCode::BAD_REQUEST, "invalid page_token").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// GET /v1/targets/{id}/results
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ResultItem {
    pub checked_at: String,
    pub status_code: u16,
    pub latency_ms: i64,
    /// Terminal transport error, or null when the probe produced an HTTP
    /// response.
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub items: Vec<ResultItem>,
}

pub async fn handle_get_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> Response {
    let since = match query.since.as_deref() {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(_) => return (StatusCode::BAD_REQUEST, "invalid since").into_response(),
        },
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);

    match state.store.get_check_results(&id, since, limit) {
        Ok(results) => {
            let items = results
                .into_iter()
                .map(|r| ResultItem {
                    checked_at: r.checked_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                    status_code: r.status_code,
                    latency_ms: r.latency_ms,
                    error: if r.error.is_empty() {
                        None
                    } else {
                        Some(r.error)
                    },
                })
                .collect();
            Json(ResultsResponse { items }).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// GET /healthz
// ============================================================================

pub async fn handle_healthz() -> StatusCode {
    StatusCode::OK
}
