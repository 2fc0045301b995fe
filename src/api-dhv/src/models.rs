use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;

use data_model_dhv::models::Job;
use data_model_dhv::store::StoreError;

//
// Request payloads
//

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCrawlJob {
    pub manufacturer_name: String,
    pub domain: String,
    #[serde(default)]
    pub product_lines: Vec<String>,
    pub sharepoint_folder: String,
    #[serde(default)]
    pub weekly_recrawl: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkUploadQuery {
    pub manufacturer_name: String,
    pub sharepoint_folder: String,
}

//
// Response payloads
//

/// Bulk-upload creation response: the job plus the up-front row validation
/// outcome.
#[derive(Debug, Serialize)]
pub struct BulkUploadCreated {
    #[serde(flatten)]
    pub job: Job,
    pub accepted_rows: usize,
    pub rejected_rows: usize,
}

/// One entry in `/api/active-jobs`, tagged with the job kind for the UI.
#[derive(Debug, Serialize)]
pub struct ActiveJob {
    #[serde(flatten)]
    pub job: Job,
    pub job_type: &'static str,
}

//
// API error envelope: every error body is `{"detail": "<human readable>"}`
//

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} not found", what))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, detail) = match self {
            ApiError::Validation(d) => (StatusCode::BAD_REQUEST, d),
            ApiError::NotFound(d) => (StatusCode::NOT_FOUND, d),
            ApiError::Conflict(d) => (StatusCode::CONFLICT, d),
            ApiError::Internal(d) => (StatusCode::INTERNAL_SERVER_ERROR, d),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::RecordNotFound => ApiError::NotFound("Record not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_404() {
        let api: ApiError = StoreError::RecordNotFound.into();
        assert!(matches!(api, ApiError::NotFound(_)));
    }

    #[test]
    fn test_create_crawl_job_defaults() {
        let body = r#"{
            "manufacturer_name": "Acme",
            "domain": "acme.example.com",
            "sharepoint_folder": "/Docs/Acme"
        }"#;
        let payload: CreateCrawlJob = serde_json::from_str(body).unwrap();
        assert!(payload.product_lines.is_empty());
        assert!(!payload.weekly_recrawl);
    }
}
