//! Cancellation plumbing for the worker process.
//!
//! The API sets `cancel_requested` in the store; this watcher polls the flag
//! every 2 seconds and trips a `CancellationToken` that every suspension
//! point in the pipeline selects against. The flag is sticky: once tripped,
//! the only remaining forward progress is a clean exit.

use std::time::Duration;

use data_model_dhv::db::DbPool;
use data_model_dhv::store;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct CancelWatch {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CancelWatch {
    pub fn spawn(pool: DbPool, job_id: Uuid) -> Self {
        let token = CancellationToken::new();
        let watcher_token = token.clone();

        let watcher = async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match store::cancel_requested(&pool, job_id).await {
                    Ok(true) => {
                        tracing::info!("Cancellation flag observed");
                        watcher_token.cancel();
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("Failed to poll cancellation flag: {}", e);
                    }
                }
            }
        };
        let handle = tokio::spawn(watcher.instrument(core_dhv::job_span(job_id)));

        Self { token, handle }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}
