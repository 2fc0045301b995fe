use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use core_dhv::crawl::ensure_scheme;
use data_model_dhv::models::{JobKind, NewJob};
use data_model_dhv::store;

use crate::models::{ApiError, CreateCrawlJob};
use crate::routes::AppState;

/// GET /api/ - service banner
pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "docharvest API", "status": "running" }))
}

/// POST /api/crawl-jobs - Create a crawl job; the supervisor admits it.
pub async fn create_crawl_job(
    State(state): State<AppState>,
    Json(payload): Json<CreateCrawlJob>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.manufacturer_name.trim().is_empty() {
        return Err(ApiError::Validation("manufacturer_name must not be empty".to_string()));
    }
    if payload.sharepoint_folder.trim().is_empty() {
        return Err(ApiError::Validation("sharepoint_folder must not be empty".to_string()));
    }
    let domain = ensure_scheme(payload.domain.trim());
    if core_dhv::is_valid_url(&domain).is_err() {
        return Err(ApiError::Validation(format!("'{}' is not a valid domain", payload.domain)));
    }

    let new_job = NewJob::crawl(
        payload.manufacturer_name.trim().to_string(),
        domain,
        payload.product_lines,
        payload.sharepoint_folder.trim().to_string(),
        payload.weekly_recrawl,
    );
    let job = store::create_job(&state.pool, new_job).await?;
    tracing::info!("Created crawl job {} for '{}'", job.id, job.manufacturer_name);

    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/crawl-jobs - All crawl jobs, newest first
pub async fn list_crawl_jobs(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = store::list_jobs(&state.pool, JobKind::Crawl).await?;
    Ok(Json(jobs))
}

/// GET /api/crawl-jobs/{id}
pub async fn get_crawl_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = fetch_job(&state, id, JobKind::Crawl).await?;
    Ok(Json(job))
}

/// GET /api/crawl-jobs/{id}/pdfs
pub async fn get_crawl_job_pdfs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let _ = fetch_job(&state, id, JobKind::Crawl).await?;
    let pdfs = store::pdfs_for_job(&state.pool, id).await?;
    Ok(Json(pdfs))
}

/// POST /api/crawl-jobs/{id}/cancel
pub async fn cancel_crawl_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = fetch_job(&state, id, JobKind::Crawl).await?;
    cancel_job(&state, &job).await
}

/// Cancellation shared by both job kinds: a terminal job answers 409; an
/// unadmitted job is cancelled directly; a running one gets the sticky flag
/// and the supervisor escalates from there.
pub(crate) async fn cancel_job(
    state: &AppState,
    job: &data_model_dhv::models::Job,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if job.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Cannot cancel job with status: {}",
            job.status.as_str()
        )));
    }

    store::request_cancel(&state.pool, job.id).await?;
    if store::cancel_pending(&state.pool, job.id).await? {
        tracing::info!("Cancelled pending job {} before admission", job.id);
    } else {
        tracing::info!("Cancellation requested for running job {}", job.id);
    }

    Ok((StatusCode::OK, Json(json!({ "message": "Job cancelled successfully" }))))
}

pub(crate) async fn fetch_job(
    state: &AppState,
    id: Uuid,
    kind: JobKind,
) -> Result<data_model_dhv::models::Job, ApiError> {
    let job = store::get_job(&state.pool, id)
        .await
        .map_err(|e| match e {
            data_model_dhv::store::StoreError::RecordNotFound => ApiError::not_found("Job"),
            other => other.into(),
        })?;
    if job.kind != kind {
        return Err(ApiError::not_found("Job"));
    }
    Ok(job)
}
