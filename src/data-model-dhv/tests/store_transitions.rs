//! Integration tests for the store's atomic operations.
//!
//! These run against a live migrated Postgres named by
//! `TEST_STATE_STORE_URL` (see `scripts/setup_test_db.sh`) and are skipped
//! when it is unset. Assertions are scoped to the rows each test creates,
//! so tests can share one database.

use data_model_dhv::models::{JobKind, JobStatus, NewSchedule, next_sunday_midnight};
use data_model_dhv::store;
use data_model_dhv::test_helpers::{
    create_test_job, create_test_pdf, get_job_by_id, try_test_db_pool,
};

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

#[tokio::test]
async fn test_legal_transition_applies() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Pending).await;

    let moved = store::transition_status(&pool, job.id, &[JobStatus::Pending], JobStatus::Crawling)
        .await
        .unwrap();
    assert!(moved);

    let job = get_job_by_id(&pool, job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Crawling);
    assert!(job.finished_at.is_none());
}

#[tokio::test]
async fn test_illegal_transition_refused() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Classifying).await;

    // the job is no longer Pending, so this edge must not fire
    let moved = store::transition_status(&pool, job.id, &[JobStatus::Pending], JobStatus::Crawling)
        .await
        .unwrap();
    assert!(!moved);

    let job = get_job_by_id(&pool, job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Classifying);
}

#[tokio::test]
async fn test_transition_cas_won_by_exactly_one_caller() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Pending).await;

    // Two admissions racing on the same pending job
    let (a, b) = tokio::join!(
        store::transition_status(&pool, job.id, &[JobStatus::Pending], JobStatus::Crawling),
        store::transition_status(&pool, job.id, &[JobStatus::Pending], JobStatus::Crawling),
    );
    let wins = [a.unwrap(), b.unwrap()].iter().filter(|w| **w).count();
    assert_eq!(wins, 1, "exactly one caller may perform a transition");
}

#[tokio::test]
async fn test_terminal_transition_sets_invariants() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Uploading).await;
    store::set_worker_pid(&pool, job.id, 4242).await.unwrap();

    let moved = store::transition_status(&pool, job.id, &[JobStatus::Uploading], JobStatus::Completed)
        .await
        .unwrap();
    assert!(moved);

    let job = get_job_by_id(&pool, job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.finished_at.is_some(), "terminal jobs carry finished_at");
    assert!(job.worker_pid.is_none(), "terminal jobs carry no worker pid");
}

#[tokio::test]
async fn test_mark_failed_records_reason_and_tail() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Crawling).await;
    store::set_worker_pid(&pool, job.id, 4243).await.unwrap();

    let moved = store::mark_failed(&pool, job.id, "worker lost", Some("stderr tail here"))
        .await
        .unwrap();
    assert!(moved);

    let job = get_job_by_id(&pool, job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("worker lost"));
    assert_eq!(job.worker_log_tail.as_deref(), Some("stderr tail here"));
    assert!(job.finished_at.is_some());
    assert!(job.worker_pid.is_none());

    // failing an already-terminal job is a no-op
    let again = store::mark_failed(&pool, job.id, "other reason", None).await.unwrap();
    assert!(!again);
    let job = get_job_by_id(&pool, job.id).await.unwrap();
    assert_eq!(job.error.as_deref(), Some("worker lost"));
}

#[tokio::test]
async fn test_counters_freeze_after_terminal() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Crawling).await;

    store::add_pdfs_found(&pool, job.id, 3).await.unwrap();
    store::add_pdfs_classified(&pool, job.id, 2).await.unwrap();
    let live = get_job_by_id(&pool, job.id).await.unwrap();
    assert_eq!((live.pdfs_found, live.pdfs_classified), (3, 2));

    store::mark_cancelled(&pool, job.id).await.unwrap();

    // a straggling worker write after cancellation must not move counters
    store::add_pdfs_found(&pool, job.id, 1).await.unwrap();
    store::add_pdfs_uploaded(&pool, job.id, 1).await.unwrap();
    let frozen = get_job_by_id(&pool, job.id).await.unwrap();
    assert_eq!(frozen.pdfs_found, 3);
    assert_eq!(frozen.pdfs_uploaded, 0);
    assert_eq!(frozen.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_requested_is_sticky_and_terminal_refuses() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Crawling).await;

    assert!(store::request_cancel(&pool, job.id).await.unwrap());
    assert!(store::cancel_requested(&pool, job.id).await.unwrap());

    store::mark_cancelled(&pool, job.id).await.unwrap();
    // a second cancel against a terminal job mutates nothing
    assert!(!store::request_cancel(&pool, job.id).await.unwrap());
    assert!(!store::mark_cancelled(&pool, job.id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_pending_races_admission() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Pending).await;

    assert!(store::cancel_pending(&pool, job.id).await.unwrap());

    // the supervisor's admission edge now loses
    let admitted = store::transition_status(&pool, job.id, &[JobStatus::Pending], JobStatus::Crawling)
        .await
        .unwrap();
    assert!(!admitted);

    let job = get_job_by_id(&pool, job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.finished_at.is_some());
}

#[tokio::test]
async fn test_discovered_pdf_unique_per_job_and_url() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Crawling).await;
    let other = create_test_job(&pool, JobKind::Crawl, JobStatus::Crawling).await;

    let url = "https://acme.example.com/docs/a.pdf";
    let first = store::insert_discovered(
        &pool,
        data_model_dhv::models::NewDiscoveredPdf::discovered(job.id, url),
    )
    .await
    .unwrap();
    assert!(first);

    let duplicate = store::insert_discovered(
        &pool,
        data_model_dhv::models::NewDiscoveredPdf::discovered(job.id, url),
    )
    .await
    .unwrap();
    assert!(!duplicate, "same (job_id, source_url) must not insert twice");

    // the same URL under a different job is a distinct discovery
    let cross_job = store::insert_discovered(
        &pool,
        data_model_dhv::models::NewDiscoveredPdf::discovered(other.id, url),
    )
    .await
    .unwrap();
    assert!(cross_job);
}

#[tokio::test]
async fn test_record_classification_and_upload_flags() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Classifying).await;
    let pdf_id = create_test_pdf(&pool, job.id, "https://acme.example.com/docs/v1-submittal.pdf").await;

    store::record_classification(&pool, pdf_id, "Submittal Sheet", true, "matched", Some(1234))
        .await
        .unwrap();

    let candidates = store::upload_candidates(&pool, job.id).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].file_size, Some(1234));

    store::mark_pdf_uploaded(&pool, pdf_id).await.unwrap();
    let candidates = store::upload_candidates(&pool, job.id).await.unwrap();
    assert!(candidates.is_empty(), "uploaded artifacts leave the work list");
}

#[tokio::test]
async fn test_advance_schedule_fires_once_per_boundary() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Completed).await;

    let next_run = next_sunday_midnight(chrono::Utc::now());
    let schedule = NewSchedule::from_job(&job, next_run);
    let schedule_id = schedule.id;
    assert!(store::insert_schedule_if_absent(&pool, schedule).await.unwrap());

    let new_next = next_sunday_midnight(next_run);
    let (a, b) = tokio::join!(
        store::advance_schedule(&pool, schedule_id, next_run, new_next),
        store::advance_schedule(&pool, schedule_id, next_run, new_next),
    );
    let wins = [a.unwrap(), b.unwrap()].iter().filter(|w| **w).count();
    assert_eq!(wins, 1, "a boundary fires at most once");

    // firing again with the stale expected value is a no-op
    assert!(!store::advance_schedule(&pool, schedule_id, next_run, new_next).await.unwrap());
}

#[tokio::test]
async fn test_schedule_dedup_by_domain_and_folder() {
    let pool = test_pool_or_skip!();
    let job = create_test_job(&pool, JobKind::Crawl, JobStatus::Completed).await;

    let next_run = next_sunday_midnight(chrono::Utc::now());
    assert!(
        store::insert_schedule_if_absent(&pool, NewSchedule::from_job(&job, next_run))
            .await
            .unwrap()
    );
    assert!(
        !store::insert_schedule_if_absent(&pool, NewSchedule::from_job(&job, next_run))
            .await
            .unwrap(),
        "same (domain, folder) must not register twice"
    );
}
