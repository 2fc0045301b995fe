//! The worker's three-phase pipeline.
//!
//! Both job kinds end in the same upload phase; they differ in how the
//! discovery records come to exist (crawling a site vs. ingesting a parts
//! list) and in whether the classifier runs a model (bulk rows are
//! user-vouched technical documents). The fetcher, model provider, and
//! document store are trait seams: production wiring lives in each
//! pipeline's `run`, and integration tests drive `run_with` against canned
//! implementations.

pub mod bulk;
pub mod crawl;

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use core_dhv::sharepoint::{DocumentStore, TransferOutcome, UploadError};
use data_model_dhv::db::DbPool;
use data_model_dhv::models::Job;
use data_model_dhv::store;

use crate::Error;

/// In-flight caps per job, per phase.
pub const CLASSIFY_CONCURRENCY: usize = 8;
pub const UPLOAD_CONCURRENCY: usize = 4;

/// Classification reads at most this much of each PDF. Enough for the first
/// page of anything reasonable; truncation just demotes classification to
/// the filename fallback.
pub const SAMPLE_BYTES: usize = 512 * 1024;

/// Uploads every allow-listed, not-yet-uploaded PDF of the job. Per-artifact
/// failures are recorded on the artifact; only cancellation aborts the phase.
pub async fn upload_phase(
    pool: &DbPool,
    job: &Job,
    store: Option<Arc<dyn DocumentStore>>,
    token: &CancellationToken,
) -> Result<(), Error> {
    let candidates = store::upload_candidates(pool, job.id).await?;
    tracing::info!(
        "Uploading {} technical PDFs to '{}'",
        candidates.len(),
        job.sharepoint_folder
    );

    if store.is_none() && !candidates.is_empty() {
        tracing::error!("Document store credentials not configured; recording upload failures");
    }

    let semaphore = Arc::new(Semaphore::new(UPLOAD_CONCURRENCY));
    let mut tasks = JoinSet::new();

    for pdf in candidates {
        if token.is_cancelled() {
            break;
        }
        let permit = semaphore.clone().acquire_owned().await?;

        let pool = pool.clone();
        let store = store.clone();
        let token = token.clone();
        let folder = job.sharepoint_folder.clone();
        let job_id = job.id;

        let task = async move {
            let result = match &store {
                Some(store) => upload_one(store.as_ref(), &folder, &pdf, &token).await,
                None => Err(UploadError::NotConfigured),
            };

            match result {
                Ok(outcome) => {
                    if outcome == TransferOutcome::SkippedDuplicate {
                        tracing::info!("'{}' already at destination, counted as uploaded", pdf.filename);
                    }
                    let _ = store::mark_pdf_uploaded(&pool, pdf.id).await;
                    let _ = store::add_pdfs_uploaded(&pool, job_id, 1).await;
                }
                Err(UploadError::Cancelled) => {}
                Err(e) => {
                    tracing::error!("Upload of '{}' failed: {}", pdf.filename, e);
                    let _ = store::record_pdf_error(&pool, pdf.id, &e.to_string()).await;
                    let _ = store::add_pdfs_failed(&pool, job_id, 1).await;
                }
            }

            drop(permit);
        };
        tasks.spawn(task.instrument(core_dhv::job_span(job_id)));
    }

    while tasks.join_next().await.is_some() {}

    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

async fn upload_one(
    store: &dyn DocumentStore,
    folder: &str,
    pdf: &data_model_dhv::models::DiscoveredPdf,
    token: &CancellationToken,
) -> Result<TransferOutcome, UploadError> {
    let source_url = Url::parse(&pdf.source_url).map_err(|e| UploadError::Status {
        code: 400,
        detail: format!("source URL unparsable: {}", e),
        retry_after: None,
    })?;

    store
        .transfer(&source_url, folder, &pdf.filename, pdf.file_size, token)
        .await
}
