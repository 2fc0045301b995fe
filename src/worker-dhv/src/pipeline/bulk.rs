//! Bulk-upload pipeline: ingest parts list → record/size rows → upload.
//!
//! Rows arrive pre-validated by the API; every row is a user-vouched
//! technical document, so the model classifier is skipped and each row is
//! recorded as a Technical Data Sheet.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use core_dhv::crawl::PageFetcher;
use core_dhv::fetch::{DEFAULT_TIMEOUT_SECS, Fetcher};
use core_dhv::partslist::{PartsRow, parse_parts_list};
use core_dhv::sharepoint::{DocumentStore, SharePointUploader};
use data_model_dhv::db::DbPool;
use data_model_dhv::models::{DocumentType, Job, JobStatus, NewDiscoveredPdf};
use data_model_dhv::store;

use crate::Error;
use crate::pipeline::{CLASSIFY_CONCURRENCY, upload_phase};

const BULK_REASON: &str = "Bulk upload - user-provided technical product data";

/// Production wiring: plain fetcher (no browser tier; parts-list URLs point
/// straight at documents) and the configured document store.
pub async fn run(pool: &DbPool, job: &Job, token: &CancellationToken) -> Result<(), Error> {
    let fetcher = Arc::new(Fetcher::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS)));
    let doc_store = SharePointUploader::from_env().map(|u| Arc::new(u) as Arc<dyn DocumentStore>);

    let result = run_with(pool, job, fetcher, doc_store, token).await;

    // The spooled parts list is single-use
    if let Err(e) = tokio::fs::remove_file(&job.source).await {
        tracing::debug!("Could not remove spooled parts list: {}", e);
    }

    result
}

/// Parses the spooled parts list, then runs the row pipeline.
pub async fn run_with<F>(
    pool: &DbPool,
    job: &Job,
    fetcher: Arc<F>,
    doc_store: Option<Arc<dyn DocumentStore>>,
    token: &CancellationToken,
) -> Result<(), Error>
where
    F: PageFetcher + 'static,
{
    let parts_path = job.source.clone();
    let parsed = tokio::task::spawn_blocking(move || parse_parts_list(Path::new(&parts_path)))
        .await
        .map_err(|e| Error::Core(core_dhv::Error::PartsList(format!("parse task panicked: {}", e))))??;

    tracing::info!(
        "Parts list: {} rows accepted, {} rejected",
        parsed.rows.len(),
        parsed.rejected
    );

    run_rows(pool, job, parsed.rows, fetcher, doc_store, token).await
}

/// The row pipeline over injected seams: record each row, size it, upload.
pub async fn run_rows<F>(
    pool: &DbPool,
    job: &Job,
    rows: Vec<PartsRow>,
    fetcher: Arc<F>,
    doc_store: Option<Arc<dyn DocumentStore>>,
    token: &CancellationToken,
) -> Result<(), Error>
where
    F: PageFetcher + 'static,
{
    // Phase 1: ingest the rows (the job enters in `crawling`)
    let mut inserted = 0;
    for row in &rows {
        let record = NewDiscoveredPdf::from_parts_row(job.id, &row.part_number, &row.pdf_url);
        if store::insert_discovered(pool, record).await? {
            inserted += 1;
            store::add_pdfs_found(pool, job.id, 1).await?;
        }
    }

    if inserted == 0 {
        return complete(pool, job).await;
    }

    // Phase 2: size and record each row (no model involved)
    if !store::transition_status(pool, job.id, &[JobStatus::Crawling], JobStatus::Classifying).await? {
        return Err(Error::Cancelled);
    }
    record_phase(pool, job, fetcher, token).await?;

    // Phase 3: upload
    if !store::transition_status(pool, job.id, &[JobStatus::Classifying], JobStatus::Uploading).await? {
        return Err(Error::Cancelled);
    }
    upload_phase(pool, job, doc_store, token).await?;

    complete(pool, job).await
}

/// Stamps each row technical with its declared size. The fetch here is a
/// cheap availability/size probe; the upload phase moves the actual bytes.
async fn record_phase<F>(
    pool: &DbPool,
    job: &Job,
    fetcher: Arc<F>,
    token: &CancellationToken,
) -> Result<(), Error>
where
    F: PageFetcher + 'static,
{
    let rows = store::pdfs_for_job(pool, job.id).await?;

    let semaphore = Arc::new(Semaphore::new(CLASSIFY_CONCURRENCY));
    let mut tasks = JoinSet::new();

    for pdf in rows {
        if token.is_cancelled() {
            break;
        }
        let permit = semaphore.clone().acquire_owned().await?;

        let pool = pool.clone();
        let fetcher = fetcher.clone();
        let token = token.clone();
        let job_id = job.id;

        let task = async move {
            let file_size = match Url::parse(&pdf.source_url) {
                Ok(url) => match fetcher.fetch_sample(&url, 1, &token).await {
                    Ok(sample) => sample.declared_size.map(|s| s as i64),
                    Err(e) => {
                        tracing::warn!(
                            "Part {}: source not reachable ({}): {}",
                            pdf.part_number.as_deref().unwrap_or("?"),
                            pdf.source_url,
                            e
                        );
                        None
                    }
                },
                Err(_) => None,
            };

            let recorded = store::record_classification(
                &pool,
                pdf.id,
                DocumentType::TechnicalDataSheet.as_str(),
                true,
                BULK_REASON,
                file_size,
            )
            .await;
            if recorded.is_ok() {
                let _ = store::add_pdfs_classified(&pool, job_id, 1).await;
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

async fn complete(pool: &DbPool, job: &Job) -> Result<(), Error> {
    let from = [JobStatus::Crawling, JobStatus::Classifying, JobStatus::Uploading];
    if !store::transition_status(pool, job.id, &from, JobStatus::Completed).await? {
        return Err(Error::Cancelled);
    }
    Ok(())
}
