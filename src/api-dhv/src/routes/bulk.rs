use axum::{
    extract::{Json, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use core_dhv::partslist::parse_parts_list;
use data_model_dhv::models::{JobKind, NewJob};
use data_model_dhv::store;

use crate::models::{ApiError, BulkUploadCreated, BulkUploadQuery};
use crate::routes::AppState;
use crate::routes::jobs::{cancel_job, fetch_job};

/// POST /api/bulk-upload - multipart parts-list upload.
///
/// The spreadsheet is validated up-front: the response carries how many
/// rows were accepted and how many rejected. The accepted file is spooled
/// to disk and the worker re-reads it.
pub async fn create_bulk_upload(
    State(state): State<AppState>,
    Query(query): Query<BulkUploadQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    if query.manufacturer_name.trim().is_empty() {
        return Err(ApiError::Validation("manufacturer_name must not be empty".to_string()));
    }
    if query.sharepoint_folder.trim().is_empty() {
        return Err(ApiError::Validation("sharepoint_folder must not be empty".to_string()));
    }

    let mut file: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() == Some("file") || field.file_name().is_some() {
            let filename = field.file_name().unwrap_or("partslist.xlsx").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::Validation(format!("Failed to read upload: {}", e)))?;
            file = Some((filename, bytes.to_vec()));
            break;
        }
    }

    let (filename, bytes) = file.ok_or_else(|| {
        ApiError::Validation("Request must include a parts-list file field".to_string())
    })?;

    let lower = filename.to_lowercase();
    if !lower.ends_with(".xlsx") && !lower.ends_with(".xls") {
        return Err(ApiError::Validation(
            "Only Excel files (.xlsx, .xls) are allowed".to_string(),
        ));
    }

    // Spool the file, then validate rows before creating the job
    tokio::fs::create_dir_all(&state.spool_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to create spool directory: {}", e)))?;
    let spool_path = state.spool_dir.join(format!("{}.xlsx", Uuid::new_v4()));
    tokio::fs::write(&spool_path, &bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to spool upload: {}", e)))?;

    let parse_path = spool_path.clone();
    let parsed = tokio::task::spawn_blocking(move || parse_parts_list(&parse_path))
        .await
        .map_err(|e| ApiError::Internal(format!("Parse task panicked: {}", e)))?
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    if parsed.rows.is_empty() {
        let _ = tokio::fs::remove_file(&spool_path).await;
        return Err(ApiError::Validation(format!(
            "Parts list contains no valid rows ({} rejected)",
            parsed.rejected
        )));
    }

    let new_job = NewJob::bulk_upload(
        query.manufacturer_name.trim().to_string(),
        spool_path.to_string_lossy().into_owned(),
        query.sharepoint_folder.trim().to_string(),
    );
    let job = store::create_job(&state.pool, new_job).await?;
    tracing::info!(
        "Created bulk-upload job {} ({} rows, {} rejected)",
        job.id,
        parsed.rows.len(),
        parsed.rejected
    );

    Ok((
        StatusCode::CREATED,
        Json(BulkUploadCreated {
            job,
            accepted_rows: parsed.rows.len(),
            rejected_rows: parsed.rejected,
        }),
    ))
}

/// GET /api/bulk-upload-jobs
pub async fn list_bulk_upload_jobs(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = store::list_jobs(&state.pool, JobKind::BulkUpload).await?;
    Ok(Json(jobs))
}

/// GET /api/bulk-upload-jobs/{id}
pub async fn get_bulk_upload_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = fetch_job(&state, id, JobKind::BulkUpload).await?;
    Ok(Json(job))
}

/// GET /api/bulk-upload-jobs/{id}/pdfs
pub async fn get_bulk_upload_pdfs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let _ = fetch_job(&state, id, JobKind::BulkUpload).await?;
    let pdfs = store::pdfs_for_job(&state.pool, id).await?;
    Ok(Json(pdfs))
}

/// POST /api/bulk-upload-jobs/{id}/cancel
pub async fn cancel_bulk_upload_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = fetch_job(&state, id, JobKind::BulkUpload).await?;
    cancel_job(&state, &job).await
}
