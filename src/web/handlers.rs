use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use super::WebState;
use crate::core::{CopyOutcome, JobStatus, NewArchiveJob};
use crate::db;
use crate::error::ArchiverError;

pub struct ApiError(ArchiverError);

impl From<ArchiverError> for ApiError {
    fn from(value: ArchiverError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ArchiverError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ArchiverError::Conflict(_) => StatusCode::CONFLICT,
            ArchiverError::Uncaught(_) | ArchiverError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize, Default)]
pub struct ListParams {
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    offset: Option<u32>,
    #[serde(default)]
    status: Option<JobStatus>,
}

pub async fn list_jobs(
    State(state): State<WebState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Response> {
    let ctx = state.orchestrator.context();
    let jobs = db::jobs::list(
        &ctx.db,
        params.limit.unwrap_or(50),
        params.offset.unwrap_or(0),
        params.status,
    )
    .await?;
    Ok(Json(jobs).into_response())
}

pub async fn create_job(
    State(state): State<WebState>,
    Json(job): Json<NewArchiveJob>,
) -> ApiResult<Response> {
    let ctx = state.orchestrator.context();
    if db::jobs::find_by_destination(&ctx.db, &job.dst_node)
        .await?
        .is_some()
    {
        return Err(ArchiverError::Conflict(format!(
            "registration {} already has an archive job",
            job.dst_node
        ))
        .into());
    }

    let job_id = state.orchestrator.create_job(job).await?;
    state.orchestrator.start_archive(&job_id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": job_id }))).into_response())
}

pub async fn get_job(State(state): State<WebState>, Path(id): Path<String>) -> ApiResult<Response> {
    let job = db::jobs::load(&state.orchestrator.context().db, &id).await?;
    Ok(Json(job).into_response())
}

pub async fn start_job(State(state): State<WebState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.orchestrator.start_archive(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn rerun_job(State(state): State<WebState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.orchestrator.rerun(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn archive_callback(
    State(state): State<WebState>,
    Path((id, addon)): Path<(String, String)>,
    Json(outcome): Json<CopyOutcome>,
) -> ApiResult<StatusCode> {
    state.orchestrator.archive_callback(&id, &addon, outcome).await?;
    Ok(StatusCode::NO_CONTENT)
}
