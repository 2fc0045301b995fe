pub mod cancel;
pub mod errors;
pub mod pipeline;

pub use errors::Error;

use data_model_dhv::db::DbPool;
use data_model_dhv::models::JobKind;
use data_model_dhv::store;
use tracing::Instrument;
use uuid::Uuid;

use crate::cancel::CancelWatch;

/// Executes one job end-to-end inside this worker process.
///
/// The supervisor has already transitioned the job to `crawling` before
/// spawning us; our contract is to drive the remaining phases, write
/// progress counters after each artifact, and honor the cancellation flag
/// within its 2 s polling cadence. Everything runs inside a job span, so
/// every line this process logs carries the job id.
pub async fn run(pool: DbPool, job_id: Uuid) -> Result<(), Error> {
    run_inner(pool, job_id)
        .instrument(core_dhv::job_span(job_id))
        .await
}

async fn run_inner(pool: DbPool, job_id: Uuid) -> Result<(), Error> {
    let job = store::get_job(&pool, job_id).await?;
    tracing::info!("Worker started ({:?} - '{}')", job.kind, job.source);

    let watch = CancelWatch::spawn(pool.clone(), job_id);
    let token = watch.token();

    let result = match job.kind {
        JobKind::Crawl => pipeline::crawl::run(&pool, &job, &token).await,
        JobKind::BulkUpload => pipeline::bulk::run(&pool, &job, &token).await,
    };

    watch.stop();

    match &result {
        Ok(()) => tracing::info!("Worker finished"),
        Err(Error::Cancelled) => {
            tracing::info!("Worker observed cancellation and stopped")
        }
        Err(e) => {
            // Record the failure reason before exiting non-zero; the
            // supervisor's mark-failed on reap is then a no-op.
            tracing::error!("Pipeline failed: {}", e);
            let _ = store::mark_failed(&pool, job_id, &e.to_string(), None).await;
        }
    }

    result
}
