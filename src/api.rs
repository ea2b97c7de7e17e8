//! Submission API boundary (C10): thin validation + enqueue, SSE progress, log retrieval.
//!
//! This is deliberately not "the hard core" (SPEC_FULL §1): every handler here either delegates
//! straight into `queue::submit`, the `JobStore`, or a job's live `watch::Receiver`, with no
//! business logic of its own. Auth, rate-limiting, and exact request/response shapes beyond
//! what SPEC_FULL §6 fixes are external concerns.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{http::StatusCode, Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};

use crate::bar_store::BarStore;
use crate::job_store::JobStore;
use crate::monitoring::MetricsCollector;
use crate::progress::ProgressRegistry;
use crate::queue::{self, CancelFlag, SubmitError};
use crate::types::{JobStatus, NewTrainingJob, TrainingJob, TrainingLog};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn JobStore>,
    pub bars: Arc<BarStore>,
    pub progress_registry: ProgressRegistry,
    pub cancel_flags: Arc<dashmap::DashMap<i64, CancelFlag>>,
    pub metrics: Arc<MetricsCollector>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:id", delete(cancel_job))
        .route("/jobs/:id/stream", get(stream_job))
        .route("/jobs/:id/logs", get(get_logs).post(post_log))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Prometheus text exposition for the ambient observability stack; not part of SPEC_FULL §6's
/// job-facing surface, but every teacher deployment exposes its `MetricsCollector` the same way.
async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct IdResponse {
    id: i64,
}

async fn submit_job(
    State(state): State<ApiState>,
    Json(spec): Json<NewTrainingJob>,
) -> Result<Json<IdResponse>, ApiError> {
    let id = queue::submit(state.store.as_ref(), state.bars.as_ref(), spec).await?;
    Ok(Json(IdResponse { id }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list_jobs(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TrainingJob>>, ApiError> {
    let statuses = parse_statuses(query.status.as_deref());
    let jobs = state.store.list_by_status(&statuses).await.map_err(ApiError::Store)?;
    Ok(Json(jobs))
}

fn parse_statuses(raw: Option<&str>) -> Vec<JobStatus> {
    let Some(raw) = raw else {
        return vec![JobStatus::Pending, JobStatus::Running];
    };
    raw.split(',')
        .filter_map(|s| match s.trim() {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

/// Deletes the row if `pending`, cooperatively cancels if `running`, no-ops if terminal
/// (SPEC_FULL §6 DELETE /jobs/{id}).
async fn cancel_job(State(state): State<ApiState>, Path(id): Path<i64>) -> Result<Json<OkResponse>, ApiError> {
    if state.store.delete_if_pending(id).await.map_err(ApiError::Store)? {
        return Ok(Json(OkResponse { ok: true }));
    }
    if let Some(flag) = state.cancel_flags.get(&id) {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }
    // No-op if already terminal or unknown; either way the caller's intent ("don't let this
    // job keep running") is satisfied or was already moot.
    Ok(Json(OkResponse { ok: true }))
}

async fn stream_job(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state
        .progress_registry
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or(ApiError::NotFound(id))?;

    let store = state.store.clone();
    let events = stream::unfold((rx, store, false), move |(mut rx, store, done)| async move {
        if done {
            return None;
        }
        if rx.changed().await.is_err() {
            return None;
        }
        let snapshot = rx.borrow().clone();
        let is_terminal = snapshot.status.is_terminal();
        let event_type = match snapshot.status {
            JobStatus::Failed => "error",
            s if s.is_terminal() => "complete",
            _ => "progress",
        };
        let event = Event::default().event(event_type).json_data(&snapshot).unwrap_or_else(|_| Event::default());
        let _ = &store; // reserved for a future fallback poll against the durable row
        Some((Ok(event), (rx, store, is_terminal)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<i64>,
}

async fn get_logs(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<TrainingLog>>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 10_000);
    let logs = state.store.recent_logs(id, limit).await.map_err(ApiError::Store)?;
    Ok(Json(logs))
}

#[derive(Debug, Deserialize)]
struct PostLogBody {
    stage: String,
    message: String,
    progress: Option<f64>,
    level: crate::types::LogLevel,
}

/// Used by workers inside the same deployment to append a log row out of band of the main
/// progress tick (SPEC_FULL §6).
async fn post_log(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<PostLogBody>,
) -> Json<IdResponse> {
    state
        .store
        .append_log(crate::progress::LogEvent {
            job_id: id,
            sequence: 0,
            stage: body.stage,
            message: body.message,
            progress: body.progress,
            level: body.level,
        })
        .await;
    Json(IdResponse { id })
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("validation error: {0}")]
    Submit(#[from] SubmitError),
    #[error("store error: {0}")]
    Store(crate::error::StoreError),
    #[error("job {0} not found or not streaming")]
    NotFound(i64),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::Submit(SubmitError::LookbackBelowMinimum { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Submit(SubmitError::DataUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Submit(SubmitError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}
