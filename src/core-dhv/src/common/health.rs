use axum::{Router, extract::State, http::StatusCode, routing::get};

use data_model_dhv::db::DbPool;

/// Liveness: the process is up and serving.
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "healthy")
}

/// Readiness: the process can reach the state store. Deployments gate
/// traffic on this so a node with a dead store connection drains instead of
/// answering with 500s.
async fn readiness_check(State(pool): State<DbPool>) -> (StatusCode, &'static str) {
    match pool.get().await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!("Readiness probe failed to reach the state store: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "state store unreachable")
        }
    }
}

pub fn health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

pub fn readiness_router(pool: DbPool) -> Router {
    Router::new()
        .route("/ready", get(readiness_check))
        .with_state(pool)
}
