use axum::{
    extract::{Json, State},
    response::IntoResponse,
};

use data_model_dhv::models::JobKind;
use data_model_dhv::store;

use crate::models::{ActiveJob, ApiError};
use crate::routes::AppState;

/// GET /api/stats - dashboard totals
pub async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = store::stats(&state.pool).await?;
    Ok(Json(stats))
}

/// GET /api/active-jobs - every job in a non-terminal state, newest first
pub async fn get_active_jobs(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let jobs = store::list_active_jobs(&state.pool).await?;
    let tagged: Vec<ActiveJob> = jobs
        .into_iter()
        .map(|job| ActiveJob {
            job_type: match job.kind {
                JobKind::Crawl => "crawl",
                JobKind::BulkUpload => "bulk_upload",
            },
            job,
        })
        .collect();
    Ok(Json(tagged))
}
