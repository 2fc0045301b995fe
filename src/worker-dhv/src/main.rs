use core_dhv::{get_db_pool, setup_logging};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file, if it exists
    dotenvy::dotenv().ok();

    setup_logging("worker_dhv=debug,core_dhv=debug");

    let job_id = match std::env::args().nth(1).map(|arg| arg.parse::<uuid::Uuid>()) {
        Some(Ok(id)) => id,
        _ => {
            eprintln!("usage: worker-dhv <job-id>");
            std::process::exit(2);
        }
    };

    let pool = get_db_pool().await;

    match worker_dhv::run(pool, job_id).await {
        Ok(()) => {}
        Err(worker_dhv::Error::Cancelled) => {
            // Clean cooperative shutdown; the supervisor owns the
            // `cancelled` transition once we are reaped.
            tracing::info!("[job: {}] Worker exiting after cancellation", job_id);
        }
        Err(e) => {
            tracing::error!("[job: {}] Worker failed: {}", job_id, e);
            eprintln!("worker error: {}", e);
            std::process::exit(1);
        }
    }
}
