//! REST handlers for scheduled posts

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use libschedcast::types::PublishingLogEntry;
use libschedcast::scheduling;
use libschedcast::service::{ListQuery, RescheduleRequest, ScheduleRequest, ScheduleTime};
use libschedcast::store::Page;
use libschedcast::{ContentSnapshot, Platform, PostStatus, ScheduledPost};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

pub const OWNER_HEADER: &str = "x-owner-id";

/// Caller identity, set by the upstream auth layer.
#[derive(Debug, Clone)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| OwnerId(v.to_string()))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for OwnerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers).ok_or(ApiError::Unauthorized)
    }
}

/// `scheduled_at` as unix seconds or an RFC 3339 string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Unix(i64),
    Text(String),
}

/// Exactly one of `scheduled_at` and `schedule` must be present.
fn schedule_time(scheduled_at: Option<Timestamp>, schedule: Option<String>) -> ApiResult<ScheduleTime> {
    match (scheduled_at, schedule) {
        (Some(Timestamp::Unix(at)), None) => Ok(ScheduleTime::At(at)),
        (Some(Timestamp::Text(text)), None) => Ok(ScheduleTime::At(scheduling::parse_absolute(&text)?)),
        (None, Some(expression)) => Ok(ScheduleTime::Expression(expression)),
        (Some(_), Some(_)) => Err(ApiError::BadRequest(
            "Give either scheduled_at or schedule, not both".to_string(),
        )),
        (None, None) => Err(ApiError::BadRequest(
            "scheduled_at or schedule is required".to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePostBody {
    #[serde(alias = "platformConnectionId")]
    pub platform_connection_id: String,
    #[serde(alias = "contentSnapshot")]
    pub content: ContentSnapshot,
    #[serde(default, alias = "scheduledAt")]
    pub scheduled_at: Option<Timestamp>,
    #[serde(default)]
    pub schedule: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReschedulePostBody {
    #[serde(default, alias = "scheduledAt")]
    pub scheduled_at: Option<Timestamp>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default, alias = "contentSnapshot")]
    pub content: Option<ContentSnapshot>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub platform: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListParams {
    fn into_query(self) -> ApiResult<ListQuery> {
        let status = self
            .status
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<PostStatus>())
            .transpose()
            .map_err(ApiError::BadRequest)?;
        let platform = self
            .platform
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<Platform>())
            .transpose()
            .map_err(ApiError::BadRequest)?;
        Ok(ListQuery {
            status,
            platform,
            page: self.page,
            per_page: self.per_page,
        })
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    match state.service.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "version": version })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "version": version })),
            )
        }
    }
}

pub async fn create_post(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    body: Result<Json<CreatePostBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ScheduledPost>)> {
    let Json(body) = body?;
    let when = schedule_time(body.scheduled_at, body.schedule)?;

    let post = state
        .service
        .schedule(
            ScheduleRequest {
                owner_id,
                platform_connection_id: body.platform_connection_id,
                content: body.content,
                when,
            },
            now(),
        )
        .await?;

    tracing::info!(post_id = %post.id, platform = %post.platform, scheduled_at = post.scheduled_at, "Post scheduled");
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn list_posts(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Page<ScheduledPost>>> {
    let Query(params) = params?;
    let page = state.service.list(&owner_id, params.into_query()?).await?;
    Ok(Json(page))
}

pub async fn get_post(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> ApiResult<Json<ScheduledPost>> {
    Ok(Json(state.service.get(&owner_id, &id).await?))
}

pub async fn reschedule_post(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
    body: Result<Json<ReschedulePostBody>, JsonRejection>,
) -> ApiResult<Json<ScheduledPost>> {
    let Json(body) = body?;
    let request = RescheduleRequest {
        when: schedule_time(body.scheduled_at, body.schedule)?,
        content: body.content,
    };
    let post = state.service.reschedule(&owner_id, &id, request, now()).await?;
    Ok(Json(post))
}

pub async fn cancel_post(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> ApiResult<Json<ScheduledPost>> {
    let post = state.service.cancel(&owner_id, &id, now()).await?;
    tracing::info!(post_id = %post.id, "Post cancelled");
    Ok(Json(post))
}

pub async fn post_logs(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<PublishingLogEntry>>> {
    Ok(Json(state.service.logs(&owner_id, &id).await?))
}

/// Fallback for unknown paths, in the same error shape as everything else
pub async fn not_found() -> impl IntoResponse {
    let body: Value = json!({
        "error": { "kind": "not_found", "message": "No such route" }
    });
    (StatusCode::NOT_FOUND, Json(body))
}
