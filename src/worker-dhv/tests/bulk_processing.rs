//! Bulk-upload row-pipeline tests against a live state store.
//!
//! `run_rows` is driven directly with synthetic rows (spreadsheet parsing
//! has its own unit coverage in `core-dhv::partslist`), canned sources, and
//! an in-memory document store. Skipped without `TEST_STATE_STORE_URL`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use url::Url;

use core_dhv::crawl::PageFetcher;
use core_dhv::fetch::{FetchError, Fetched};
use core_dhv::partslist::PartsRow;
use core_dhv::sharepoint::{DocumentStore, MemoryStore};
use data_model_dhv::models::{JobStatus, NewJob};
use data_model_dhv::store;
use data_model_dhv::test_helpers::{create_test_job_from, get_job_by_id, try_test_db_pool};
use worker_dhv::pipeline;

macro_rules! test_pool_or_skip {
    () => {
        match try_test_db_pool().await {
            Some(pool) => pool,
            None => {
                println!("[SKIP] TEST_STATE_STORE_URL is not set");
                return;
            }
        }
    };
}

/// Serves a fixed PDF body for every URL under the parts host and 404s the
/// one marked dead.
struct PartsSource;

const DEAD_URL: &str = "https://parts.example.com/docs/gone.pdf";

#[async_trait]
impl PageFetcher for PartsSource {
    async fn fetch_page(&self, _url: &Url, _cancel: &CancellationToken) -> Result<Fetched, FetchError> {
        Err(FetchError::HttpStatus(404))
    }

    async fn fetch_sample(
        &self,
        url: &Url,
        _max_bytes: usize,
        _cancel: &CancellationToken,
    ) -> Result<Fetched, FetchError> {
        if url.as_str() == DEAD_URL {
            return Err(FetchError::HttpStatus(404));
        }
        let bytes = Bytes::from_static(b"%PDF-1.4 canned part document");
        Ok(Fetched {
            declared_size: Some(bytes.len() as u64),
            bytes,
            mime: Some("application/pdf".to_string()),
            final_url: url.clone(),
        })
    }
}

fn bulk_job(folder: &str) -> NewJob {
    NewJob::bulk_upload(
        "Acme".to_string(),
        "/tmp/unused-parts-list.xlsx".to_string(),
        folder.to_string(),
    )
}

#[tokio::test]
async fn test_rows_recorded_and_uploaded() {
    let pool = test_pool_or_skip!();
    let job = create_test_job_from(&pool, bulk_job("/Docs/AcmeParts"), JobStatus::Crawling).await;

    let rows = vec![
        PartsRow {
            part_number: "PN-100".to_string(),
            pdf_url: "https://parts.example.com/docs/pn-100.pdf".to_string(),
        },
        PartsRow {
            part_number: "PN-200".to_string(),
            pdf_url: "https://parts.example.com/docs/pn-200.pdf".to_string(),
        },
        // no .pdf suffix: the filename falls back to the part number
        PartsRow {
            part_number: "PN-300".to_string(),
            pdf_url: "https://parts.example.com/view/8842".to_string(),
        },
    ];

    let doc_store = Arc::new(MemoryStore::new());
    let token = CancellationToken::new();
    pipeline::bulk::run_rows(
        &pool,
        &job,
        rows,
        Arc::new(PartsSource),
        Some(doc_store.clone() as Arc<dyn DocumentStore>),
        &token,
    )
    .await
    .unwrap();

    let job = get_job_by_id(&pool, job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.pdfs_found, 3);
    assert_eq!(job.pdfs_classified, 3);
    assert_eq!(job.pdfs_uploaded, 3);
    assert!(job.finished_at.is_some());

    let names: Vec<String> = doc_store
        .files_in("/Docs/AcmeParts")
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert!(names.contains(&"pn-100.pdf".to_string()));
    assert!(names.contains(&"PN-300.pdf".to_string()));

    // every row is user-vouched technical with its part number retained
    let pdfs = store::pdfs_for_job(&pool, job.id).await.unwrap();
    for pdf in &pdfs {
        assert!(pdf.is_technical);
        assert_eq!(pdf.document_type.as_deref(), Some("Technical Data Sheet"));
        assert!(pdf.part_number.is_some());
    }
}

#[tokio::test]
async fn test_unreachable_row_still_recorded() {
    let pool = test_pool_or_skip!();
    let job = create_test_job_from(&pool, bulk_job("/Docs/AcmeDead"), JobStatus::Crawling).await;

    let rows = vec![PartsRow {
        part_number: "PN-GONE".to_string(),
        pdf_url: DEAD_URL.to_string(),
    }];

    let doc_store = Arc::new(MemoryStore::new());
    let token = CancellationToken::new();
    pipeline::bulk::run_rows(
        &pool,
        &job,
        rows,
        Arc::new(PartsSource),
        Some(doc_store.clone() as Arc<dyn DocumentStore>),
        &token,
    )
    .await
    .unwrap();

    // The dead source never fails the job; the row is retained with its
    // classification, and the memory store (which moves no bytes) accepts
    // the upload keyed on a null size
    let job = get_job_by_id(&pool, job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.pdfs_found, 1);
    assert_eq!(job.pdfs_classified, 1);

    let pdfs = store::pdfs_for_job(&pool, job.id).await.unwrap();
    assert_eq!(pdfs.len(), 1);
    assert_eq!(pdfs[0].file_size, None);
    assert!(pdfs[0].is_technical);
}
