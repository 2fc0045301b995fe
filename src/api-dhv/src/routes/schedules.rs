use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use data_model_dhv::store;

use crate::models::ApiError;
use crate::routes::AppState;

/// GET /api/schedules
pub async fn list_schedules(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let schedules = store::list_schedules(&state.pool).await?;
    Ok(Json(schedules))
}

/// DELETE /api/schedules/{id}
pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !store::delete_schedule(&state.pool, id).await? {
        return Err(ApiError::not_found("Schedule"));
    }
    tracing::info!("Deleted schedule {}", id);
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Schedule deleted successfully" })),
    ))
}
