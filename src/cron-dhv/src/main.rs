use core_dhv::{TimeUnit, get_db_pool, get_poll_interval, setup_logging};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file, if it exists
    dotenvy::dotenv().ok();

    setup_logging("cron_dhv=debug");

    let pool = get_db_pool().await;
    let poll_interval = get_poll_interval(TimeUnit::Seconds, "CRON_POLL_INTERVAL_S", 60);

    tracing::info!(
        "Scheduler started, polling every {:?} (recrawl cadence: Sunday 00:00 UTC)",
        poll_interval
    );

    // Polling before the first sleep lets boundaries missed while the
    // scheduler was down fire immediately at startup.
    loop {
        match cron_dhv::poll_and_fire(&pool).await {
            Ok(0) => {}
            Ok(fired) => tracing::info!("Fired {} recrawl job(s)", fired),
            Err(e) => tracing::error!("Scheduler tick failed: {}", e),
        }
        tokio::time::sleep(poll_interval).await;
    }
}
