//! Test utilities for state-store integration tests.
//!
//! These helpers connect to the database named by `TEST_STATE_STORE_URL`.
//! Tests that need a live store follow the skip pattern:
//!
//! ```ignore
//! let Some(pool) = try_test_db_pool().await else {
//!     println!("[SKIP] TEST_STATE_STORE_URL is not set");
//!     return;
//! };
//! ```
//!
//! so the suite passes without Postgres and exercises the real store when
//! one is available. `scripts/setup_test_db.sh` boots a disposable
//! migrated database via `docker-compose.test.yml` and prints the URL to
//! export.

use uuid::Uuid;

use crate::db::{DbPool, establish_connection_pool};
use crate::models::{DiscoveredPdf, Job, JobKind, JobStatus, NewDiscoveredPdf, NewJob};
use crate::schema::{discovered_pdfs, jobs, schedules};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

/// Connects to the test database, or None when `TEST_STATE_STORE_URL` is
/// unset. Panics when the variable is set but the store is unreachable:
/// that is a broken test environment, not a reason to skip.
pub async fn try_test_db_pool() -> Option<DbPool> {
    let url = std::env::var("TEST_STATE_STORE_URL").ok()?;
    let pool = establish_connection_pool(&url)
        .await
        .unwrap_or_else(|e| panic!("TEST_STATE_STORE_URL is set but unusable: {}", e));
    Some(pool)
}

/// Removes every row from every table. Tests run in parallel against one
/// shared database, so prefer id-scoped assertions; reach for this only
/// when a pristine store is genuinely required.
pub async fn clean_test_db(pool: &DbPool) {
    let mut conn = pool.get().await.expect("test db connection");
    diesel::delete(discovered_pdfs::table)
        .execute(&mut conn)
        .await
        .expect("clean discovered_pdfs");
    diesel::delete(schedules::table)
        .execute(&mut conn)
        .await
        .expect("clean schedules");
    diesel::delete(jobs::table)
        .execute(&mut conn)
        .await
        .expect("clean jobs");
}

/// Inserts a job with a unique source domain and forces it into the given
/// status (bypassing the legal transition guard, which tests need in order
/// to set up arbitrary states). The unique domain keeps parallel tests
/// from tripping over each other's schedule and discovery rows.
pub async fn create_test_job(pool: &DbPool, kind: JobKind, status: JobStatus) -> Job {
    let tag = Uuid::new_v4().simple().to_string();
    let new_job = match kind {
        JobKind::Crawl => NewJob::crawl(
            "Acme".to_string(),
            format!("https://{}.example.com", tag),
            vec![],
            format!("/Docs/{}", tag),
            false,
        ),
        JobKind::BulkUpload => NewJob::bulk_upload(
            "Acme".to_string(),
            format!("/tmp/parts-{}.xlsx", tag),
            format!("/Docs/{}", tag),
        ),
    };
    create_test_job_from(pool, new_job, status).await
}

/// Inserts the given job as-is and forces its status. Scenario tests use
/// this when the source URL or folder must match canned fixtures.
pub async fn create_test_job_from(pool: &DbPool, new_job: NewJob, status: JobStatus) -> Job {
    let job_id = new_job.id;

    let mut conn = pool.get().await.expect("test db connection");
    diesel::insert_into(jobs::table)
        .values(&new_job)
        .execute(&mut conn)
        .await
        .expect("insert test job");

    set_job_status(pool, job_id, status).await;
    get_job_by_id(pool, job_id).await.expect("job just inserted")
}

/// Unguarded status write, for test setup only.
pub async fn set_job_status(pool: &DbPool, job_id: Uuid, status: JobStatus) {
    let mut conn = pool.get().await.expect("test db connection");
    diesel::update(jobs::table.find(job_id))
        .set(jobs::status.eq(status))
        .execute(&mut conn)
        .await
        .expect("set test job status");
}

pub async fn get_job_by_id(pool: &DbPool, job_id: Uuid) -> Option<Job> {
    let mut conn = pool.get().await.expect("test db connection");
    jobs::table
        .find(job_id)
        .select(Job::as_select())
        .first(&mut conn)
        .await
        .ok()
}

/// Inserts a discovery row for a job.
pub async fn create_test_pdf(pool: &DbPool, job_id: Uuid, source_url: &str) -> Uuid {
    let row = NewDiscoveredPdf::discovered(job_id, source_url);
    let id = row.id;
    let mut conn = pool.get().await.expect("test db connection");
    diesel::insert_into(discovered_pdfs::table)
        .values(&row)
        .execute(&mut conn)
        .await
        .expect("insert test pdf");
    id
}

pub async fn get_pdfs_for_job(pool: &DbPool, job_id: Uuid) -> Vec<DiscoveredPdf> {
    let mut conn = pool.get().await.expect("test db connection");
    discovered_pdfs::table
        .filter(discovered_pdfs::job_id.eq(job_id))
        .select(DiscoveredPdf::as_select())
        .load(&mut conn)
        .await
        .expect("load test pdfs")
}
