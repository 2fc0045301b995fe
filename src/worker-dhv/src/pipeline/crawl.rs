//! Crawl-job pipeline: crawl → classify → upload.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use core_dhv::browser::{ChromiumBrowser, PageBrowser};
use core_dhv::classify::classify_pdf;
use core_dhv::crawl::{CrawlError, Crawler, PageFetcher};
use core_dhv::fetch::{DEFAULT_TIMEOUT_SECS, Fetcher};
use core_dhv::llms::{LlmProvider, OpenAi};
use core_dhv::pdftext::first_page_text;
use core_dhv::sharepoint::{DocumentStore, SharePointUploader};
use data_model_dhv::db::DbPool;
use data_model_dhv::models::{Job, JobStatus, NewDiscoveredPdf, NewSchedule, next_sunday_midnight};
use data_model_dhv::store;

use crate::Error;
use crate::pipeline::{CLASSIFY_CONCURRENCY, SAMPLE_BYTES, upload_phase};

/// Production wiring: real fetcher with the browser escalation tier, the
/// configured model provider, and the configured document store.
pub async fn run(pool: &DbPool, job: &Job, token: &CancellationToken) -> Result<(), Error> {
    let browser = ChromiumBrowser::new();
    let fetcher = Arc::new(
        Fetcher::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .with_browser(browser.clone() as Arc<dyn PageBrowser>),
    );
    let provider = Some(Arc::new(OpenAi::new()));
    let doc_store = SharePointUploader::from_env().map(|u| Arc::new(u) as Arc<dyn DocumentStore>);

    let result = run_with(pool, job, fetcher, provider, doc_store, token).await;

    // The browser dies with the process group regardless, but a cooperative
    // teardown avoids orphaned Chromium instances on the happy path.
    browser.shutdown().await;

    result
}

/// The pipeline itself, over injected seams.
pub async fn run_with<F, P>(
    pool: &DbPool,
    job: &Job,
    fetcher: Arc<F>,
    provider: Option<Arc<P>>,
    doc_store: Option<Arc<dyn DocumentStore>>,
    token: &CancellationToken,
) -> Result<(), Error>
where
    F: PageFetcher + 'static,
    P: LlmProvider + 'static,
{
    // Phase 1: crawl (the supervisor set `crawling` before spawning us)
    let crawler = Crawler::new(fetcher.as_ref(), job.product_lines.clone());
    let outcome = match crawler.crawl(&job.source, token).await {
        Ok(outcome) => outcome,
        Err(CrawlError::Cancelled) => return Err(Error::Cancelled),
        Err(e) => return Err(e.into()),
    };

    let mut found = 0;
    for candidate in &outcome.pdfs {
        if store::insert_discovered(pool, NewDiscoveredPdf::discovered(job.id, &candidate.url)).await? {
            found += 1;
            store::add_pdfs_found(pool, job.id, 1).await?;
        }
    }
    tracing::info!("Crawl found {} PDFs over {} pages", found, outcome.pages_visited);

    if found == 0 {
        if outcome.page_errors > 0 {
            return Err(Error::ZeroPdfsWithErrors(outcome.page_errors));
        }
        // An empty but healthy site completes with all counters at zero
        complete(pool, job).await?;
        return Ok(());
    }

    // Phase 2: classify
    if !store::transition_status(pool, job.id, &[JobStatus::Crawling], JobStatus::Classifying).await? {
        return Err(Error::Cancelled);
    }
    classify_phase(pool, job, fetcher, provider, token).await?;

    // Phase 3: upload
    if !store::transition_status(pool, job.id, &[JobStatus::Classifying], JobStatus::Uploading).await? {
        return Err(Error::Cancelled);
    }
    upload_phase(pool, job, doc_store, token).await?;

    complete(pool, job).await
}

async fn classify_phase<F, P>(
    pool: &DbPool,
    job: &Job,
    fetcher: Arc<F>,
    provider: Option<Arc<P>>,
    token: &CancellationToken,
) -> Result<(), Error>
where
    F: PageFetcher + 'static,
    P: LlmProvider + 'static,
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
        let provider = provider.clone();
        let token = token.clone();
        let job_id = job.id;

        let task = async move {
            classify_one(&pool, provider.as_deref(), fetcher.as_ref(), job_id, &pdf, &token).await;
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

async fn classify_one<F: PageFetcher, P: LlmProvider>(
    pool: &DbPool,
    provider: Option<&P>,
    fetcher: &F,
    job_id: uuid::Uuid,
    pdf: &data_model_dhv::models::DiscoveredPdf,
    token: &CancellationToken,
) {
    if token.is_cancelled() {
        return;
    }

    // Pull a bounded sample for first-page text; a failed or truncated
    // download demotes classification to the filename heuristic.
    let (excerpt, file_size) = match Url::parse(&pdf.source_url) {
        Ok(url) => match fetcher.fetch_sample(&url, SAMPLE_BYTES, token).await {
            Ok(sample) => {
                let size = sample
                    .declared_size
                    .map(|s| s as i64)
                    .or_else(|| (sample.bytes.len() < SAMPLE_BYTES).then_some(sample.bytes.len() as i64));
                let text = first_page_text(&sample.bytes)
                    .map_err(|e| {
                        tracing::debug!("No text from '{}': {}", pdf.filename, e);
                        e
                    })
                    .ok();
                (text, size)
            }
            Err(e) => {
                tracing::warn!("Could not sample '{}' for classification: {}", pdf.source_url, e);
                (None, None)
            }
        },
        Err(e) => {
            tracing::warn!("Unparsable PDF URL '{}': {}", pdf.source_url, e);
            (None, None)
        }
    };

    if token.is_cancelled() {
        return;
    }

    let classification = classify_pdf(provider, &pdf.filename, excerpt.as_deref()).await;
    tracing::info!(
        "Classified '{}' as '{}' (technical: {})",
        pdf.filename,
        classification.document_type,
        classification.is_technical
    );

    let recorded = store::record_classification(
        pool,
        pdf.id,
        classification.document_type.as_str(),
        classification.is_technical,
        &classification.reason,
        file_size,
    )
    .await;
    match recorded {
        Ok(()) => {
            let _ = store::add_pdfs_classified(pool, job_id, 1).await;
        }
        Err(e) => {
            tracing::error!("Failed to record classification: {}", e);
        }
    }
}

async fn complete(pool: &DbPool, job: &Job) -> Result<(), Error> {
    let from = [JobStatus::Crawling, JobStatus::Classifying, JobStatus::Uploading];
    if !store::transition_status(pool, job.id, &from, JobStatus::Completed).await? {
        return Err(Error::Cancelled);
    }

    if job.weekly_recrawl {
        let schedule = NewSchedule::from_job(job, next_sunday_midnight(chrono::Utc::now()));
        if store::insert_schedule_if_absent(pool, schedule).await? {
            tracing::info!("Registered weekly recrawl schedule");
        }
    }

    Ok(())
}
