use std::path::PathBuf;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use data_model_dhv::db::DbPool;

pub mod bulk;
pub mod jobs;
pub mod schedules;
pub mod stats;

/// Parts lists can be a few megabytes of spreadsheet.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub spool_dir: PathBuf,
}

impl AppState {
    pub fn from_env(pool: DbPool) -> Self {
        let spool_dir = std::env::var("UPLOAD_SPOOL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("docharvest-uploads"));
        Self { pool, spool_dir }
    }
}

//
// Router
//

pub fn router(state: AppState) -> Router {
    let probes = core_dhv::health_router().merge(core_dhv::readiness_router(state.pool.clone()));

    Router::new()
        .route("/api/", get(jobs::root))
        .route("/api/stats", get(stats::get_stats))
        .route("/api/active-jobs", get(stats::get_active_jobs))
        // crawl jobs
        .route("/api/crawl-jobs", get(jobs::list_crawl_jobs))
        .route("/api/crawl-jobs", post(jobs::create_crawl_job))
        .route("/api/crawl-jobs/{id}", get(jobs::get_crawl_job))
        .route("/api/crawl-jobs/{id}/cancel", post(jobs::cancel_crawl_job))
        .route("/api/crawl-jobs/{id}/pdfs", get(jobs::get_crawl_job_pdfs))
        // bulk-upload jobs
        .route("/api/bulk-upload", post(bulk::create_bulk_upload))
        .route("/api/bulk-upload-jobs", get(bulk::list_bulk_upload_jobs))
        .route("/api/bulk-upload-jobs/{id}", get(bulk::get_bulk_upload_job))
        .route("/api/bulk-upload-jobs/{id}/cancel", post(bulk::cancel_bulk_upload_job))
        .route("/api/bulk-upload-jobs/{id}/pdfs", get(bulk::get_bulk_upload_pdfs))
        // schedules
        .route("/api/schedules", get(schedules::list_schedules))
        .route("/api/schedules/{id}", delete(schedules::delete_schedule))
        .with_state(state)
        // Liveness and state-store readiness for deployment probes
        .merge(probes)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
