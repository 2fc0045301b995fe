use core_dhv::{get_db_pool, setup_logging};

use api_dhv::routes::{self, AppState};
use api_dhv::supervisor::{Supervisor, SupervisorConfig};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file, if it exists
    dotenvy::dotenv().ok();

    setup_logging("api_dhv=debug,tower_http=debug");

    let pool = get_db_pool().await;

    // The supervisor shares this process with the API: all heavy per-job
    // work runs in worker subprocesses, so the server stays responsive.
    let supervisor = Supervisor::new(pool.clone(), SupervisorConfig::from_env());
    tokio::spawn(async move { supervisor.run().await });

    let state = AppState::from_env(pool);
    let app = routes::router(state);

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8000".to_string());
    let addr = format!("{}:{}", host, port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to address {}: {}", addr, e));
    tracing::info!("API listening on {}", addr);
    axum::serve(listener, app).await.expect("API server failed");
}
