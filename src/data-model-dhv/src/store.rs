//! Atomic operations over the state store.
//!
//! Every status transition is a guarded `UPDATE … WHERE status = ANY(from)`
//! so the state machine is enforced at the database, not in memory: a
//! transition that lost a race affects zero rows and the caller observes it.
//! Counter updates are atomic increments and are refused once a job has
//! reached a terminal state.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::{
    DiscoveredPdf, Job, JobKind, JobStatus, NewDiscoveredPdf, NewJob, NewSchedule, Schedule,
};
use crate::schema::{discovered_pdfs, jobs, schedules};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found in store")]
    RecordNotFound,
    #[error("Store error: {0}")]
    Db(diesel::result::Error),
    #[error("Store pool error: {0}")]
    Pool(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(error: diesel::result::Error) -> Self {
        match error {
            diesel::result::Error::NotFound => Self::RecordNotFound,
            _ => Self::Db(error),
        }
    }
}

impl<E: std::fmt::Debug> From<deadpool::managed::PoolError<E>> for StoreError {
    fn from(error: deadpool::managed::PoolError<E>) -> Self {
        Self::Pool(format!("{:?}", error))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

//
// Jobs
//

pub async fn create_job(pool: &DbPool, new_job: NewJob) -> Result<Job> {
    let mut conn = pool.get().await?;
    let job = diesel::insert_into(jobs::table)
        .values(&new_job)
        .returning(Job::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok(job)
}

pub async fn get_job(pool: &DbPool, job_id: Uuid) -> Result<Job> {
    let mut conn = pool.get().await?;
    let job = jobs::table
        .find(job_id)
        .select(Job::as_select())
        .first(&mut conn)
        .await?;
    Ok(job)
}

pub async fn list_jobs(pool: &DbPool, kind: JobKind) -> Result<Vec<Job>> {
    let mut conn = pool.get().await?;
    let rows = jobs::table
        .filter(jobs::kind.eq(kind))
        .order(jobs::created_at.desc())
        .select(Job::as_select())
        .load(&mut conn)
        .await?;
    Ok(rows)
}

pub async fn list_active_jobs(pool: &DbPool) -> Result<Vec<Job>> {
    let mut conn = pool.get().await?;
    let rows = jobs::table
        .filter(jobs::status.eq_any(JobStatus::active_states()))
        .order(jobs::created_at.desc())
        .select(Job::as_select())
        .load(&mut conn)
        .await?;
    Ok(rows)
}

/// Oldest-first pending jobs, the supervisor's admission queue.
pub async fn pending_jobs_fifo(pool: &DbPool, limit: i64) -> Result<Vec<Job>> {
    let mut conn = pool.get().await?;
    let rows = jobs::table
        .filter(jobs::status.eq(JobStatus::Pending))
        .order(jobs::created_at.asc())
        .limit(limit)
        .select(Job::as_select())
        .load(&mut conn)
        .await?;
    Ok(rows)
}

/// Compare-and-set status transition. Returns true when this call performed
/// the transition, false when the job was no longer in any of the `from`
/// states (lost race, cancellation, etc.).
pub async fn transition_status(
    pool: &DbPool,
    job_id: Uuid,
    from: &[JobStatus],
    to: JobStatus,
) -> Result<bool> {
    let mut conn = pool.get().await?;
    let now = Utc::now();
    let guarded = jobs::table
        .find(job_id)
        .filter(jobs::status.eq_any(from.to_vec()));

    // Terminal states atomically pick up finished_at and drop the worker pid
    // in the same statement, so the terminal invariant is never observable
    // half-applied.
    let affected = if to.is_terminal() {
        diesel::update(guarded)
            .set((
                jobs::status.eq(to),
                jobs::updated_at.eq(now),
                jobs::finished_at.eq(now),
                jobs::worker_pid.eq(None::<i32>),
            ))
            .execute(&mut conn)
            .await?
    } else {
        diesel::update(guarded)
            .set((jobs::status.eq(to), jobs::updated_at.eq(now)))
            .execute(&mut conn)
            .await?
    };
    Ok(affected == 1)
}

/// Terminal failure: sets the reason and (optionally) the tail of the
/// worker's captured stderr. Applies only to non-terminal jobs.
pub async fn mark_failed(
    pool: &DbPool,
    job_id: Uuid,
    reason: &str,
    log_tail: Option<&str>,
) -> Result<bool> {
    let mut conn = pool.get().await?;
    let now = Utc::now();
    let affected = diesel::update(
        jobs::table
            .find(job_id)
            .filter(jobs::status.eq_any(JobStatus::active_states())),
    )
    .set((
        jobs::status.eq(JobStatus::Failed),
        jobs::error.eq(reason),
        jobs::worker_log_tail.eq(log_tail),
        jobs::worker_pid.eq(None::<i32>),
        jobs::updated_at.eq(now),
        jobs::finished_at.eq(now),
    ))
    .execute(&mut conn)
    .await?;
    Ok(affected == 1)
}

/// Terminal cancellation. Called by the supervisor only after the worker
/// process has been reaped.
pub async fn mark_cancelled(pool: &DbPool, job_id: Uuid) -> Result<bool> {
    let mut conn = pool.get().await?;
    let now = Utc::now();
    let affected = diesel::update(
        jobs::table
            .find(job_id)
            .filter(jobs::status.eq_any(JobStatus::active_states())),
    )
    .set((
        jobs::status.eq(JobStatus::Cancelled),
        jobs::error.eq("Job cancelled by user"),
        jobs::worker_pid.eq(None::<i32>),
        jobs::updated_at.eq(now),
        jobs::finished_at.eq(now),
    ))
    .execute(&mut conn)
    .await?;
    Ok(affected == 1)
}

/// Cancels a job that has not been admitted yet. Racing against admission is
/// safe: whichever compare-and-set runs first wins, and the loser observes
/// zero affected rows.
pub async fn cancel_pending(pool: &DbPool, job_id: Uuid) -> Result<bool> {
    let mut conn = pool.get().await?;
    let now = Utc::now();
    let affected = diesel::update(
        jobs::table
            .find(job_id)
            .filter(jobs::status.eq(JobStatus::Pending)),
    )
    .set((
        jobs::status.eq(JobStatus::Cancelled),
        jobs::error.eq("Job cancelled by user"),
        jobs::updated_at.eq(now),
        jobs::finished_at.eq(now),
    ))
    .execute(&mut conn)
    .await?;
    Ok(affected == 1)
}

/// Sticky cancellation flag. Returns false when the job was already terminal.
pub async fn request_cancel(pool: &DbPool, job_id: Uuid) -> Result<bool> {
    let mut conn = pool.get().await?;
    let affected = diesel::update(
        jobs::table
            .find(job_id)
            .filter(jobs::status.eq_any(JobStatus::active_states())),
    )
    .set((
        jobs::cancel_requested.eq(true),
        jobs::updated_at.eq(Utc::now()),
    ))
    .execute(&mut conn)
    .await?;
    Ok(affected == 1)
}

pub async fn cancel_requested(pool: &DbPool, job_id: Uuid) -> Result<bool> {
    let mut conn = pool.get().await?;
    let flag = jobs::table
        .find(job_id)
        .select(jobs::cancel_requested)
        .first::<bool>(&mut conn)
        .await?;
    Ok(flag)
}

pub async fn set_worker_pid(pool: &DbPool, job_id: Uuid, pid: i32) -> Result<()> {
    let mut conn = pool.get().await?;
    diesel::update(jobs::table.find(job_id))
        .set((jobs::worker_pid.eq(pid), jobs::updated_at.eq(Utc::now())))
        .execute(&mut conn)
        .await?;
    Ok(())
}

pub async fn clear_worker_pid(pool: &DbPool, job_id: Uuid) -> Result<()> {
    let mut conn = pool.get().await?;
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::worker_pid.eq(None::<i32>),
            jobs::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
    Ok(())
}

//
// Counters: atomic increments, refused on terminal jobs so a cancelled or
// failed job never moves again (spec: monotone until terminal, then frozen).
//

macro_rules! counter_increment {
    ($fn_name:ident, $column:ident) => {
        pub async fn $fn_name(pool: &DbPool, job_id: Uuid, by: i32) -> Result<()> {
            let mut conn = pool.get().await?;
            diesel::update(
                jobs::table
                    .find(job_id)
                    .filter(jobs::status.eq_any(JobStatus::active_states())),
            )
            .set((
                jobs::$column.eq(jobs::$column + by),
                jobs::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
            Ok(())
        }
    };
}

counter_increment!(add_pdfs_found, pdfs_found);
counter_increment!(add_pdfs_classified, pdfs_classified);
counter_increment!(add_pdfs_uploaded, pdfs_uploaded);
counter_increment!(add_pdfs_failed, pdfs_failed);

//
// Discovered PDFs
//

/// Inserts a discovery, deduplicating on `(job_id, source_url)`.
/// Returns true when the row was inserted, false when it already existed.
pub async fn insert_discovered(pool: &DbPool, row: NewDiscoveredPdf) -> Result<bool> {
    let mut conn = pool.get().await?;
    let affected = diesel::insert_into(discovered_pdfs::table)
        .values(&row)
        .on_conflict((discovered_pdfs::job_id, discovered_pdfs::source_url))
        .do_nothing()
        .execute(&mut conn)
        .await?;
    Ok(affected == 1)
}

pub async fn pdfs_for_job(pool: &DbPool, job_id: Uuid) -> Result<Vec<DiscoveredPdf>> {
    let mut conn = pool.get().await?;
    let rows = discovered_pdfs::table
        .filter(discovered_pdfs::job_id.eq(job_id))
        .order(discovered_pdfs::created_at.asc())
        .select(DiscoveredPdf::as_select())
        .load(&mut conn)
        .await?;
    Ok(rows)
}

/// The uploader's work list: allow-listed PDFs not yet at the destination.
pub async fn upload_candidates(pool: &DbPool, job_id: Uuid) -> Result<Vec<DiscoveredPdf>> {
    let mut conn = pool.get().await?;
    let rows = discovered_pdfs::table
        .filter(discovered_pdfs::job_id.eq(job_id))
        .filter(discovered_pdfs::is_technical.eq(true))
        .filter(discovered_pdfs::sharepoint_uploaded.eq(false))
        .select(DiscoveredPdf::as_select())
        .load(&mut conn)
        .await?;
    Ok(rows)
}

pub async fn record_classification(
    pool: &DbPool,
    pdf_id: Uuid,
    document_type: &str,
    is_technical: bool,
    reason: &str,
    file_size: Option<i64>,
) -> Result<()> {
    let mut conn = pool.get().await?;
    diesel::update(discovered_pdfs::table.find(pdf_id))
        .set((
            discovered_pdfs::document_type.eq(document_type),
            discovered_pdfs::is_technical.eq(is_technical),
            discovered_pdfs::classification_reason.eq(reason),
            discovered_pdfs::file_size.eq(file_size),
        ))
        .execute(&mut conn)
        .await?;
    Ok(())
}

pub async fn mark_pdf_uploaded(pool: &DbPool, pdf_id: Uuid) -> Result<()> {
    let mut conn = pool.get().await?;
    diesel::update(discovered_pdfs::table.find(pdf_id))
        .set(discovered_pdfs::sharepoint_uploaded.eq(true))
        .execute(&mut conn)
        .await?;
    Ok(())
}

pub async fn record_pdf_error(pool: &DbPool, pdf_id: Uuid, error: &str) -> Result<()> {
    let mut conn = pool.get().await?;
    diesel::update(discovered_pdfs::table.find(pdf_id))
        .set(discovered_pdfs::error.eq(error))
        .execute(&mut conn)
        .await?;
    Ok(())
}

//
// Schedules
//

pub async fn list_schedules(pool: &DbPool) -> Result<Vec<Schedule>> {
    let mut conn = pool.get().await?;
    let rows = schedules::table
        .order(schedules::created_at.desc())
        .select(Schedule::as_select())
        .load(&mut conn)
        .await?;
    Ok(rows)
}

pub async fn delete_schedule(pool: &DbPool, schedule_id: Uuid) -> Result<bool> {
    let mut conn = pool.get().await?;
    let affected = diesel::delete(schedules::table.find(schedule_id))
        .execute(&mut conn)
        .await?;
    Ok(affected == 1)
}

/// Registers a recrawl schedule unless one already exists for the same
/// `(domain, sharepoint_folder)` pair.
pub async fn insert_schedule_if_absent(pool: &DbPool, schedule: NewSchedule) -> Result<bool> {
    let mut conn = pool.get().await?;
    let existing: i64 = schedules::table
        .filter(schedules::domain.eq(&schedule.domain))
        .filter(schedules::sharepoint_folder.eq(&schedule.sharepoint_folder))
        .count()
        .get_result(&mut conn)
        .await?;
    if existing > 0 {
        return Ok(false);
    }
    diesel::insert_into(schedules::table)
        .values(&schedule)
        .execute(&mut conn)
        .await?;
    Ok(true)
}

pub async fn due_schedules(pool: &DbPool, now: chrono::DateTime<Utc>) -> Result<Vec<Schedule>> {
    let mut conn = pool.get().await?;
    let rows = schedules::table
        .filter(schedules::enabled.eq(true))
        .filter(schedules::next_run.le(now))
        .select(Schedule::as_select())
        .load(&mut conn)
        .await?;
    Ok(rows)
}

/// Advances a schedule past a fire. The compare-and-set on `next_run` means
/// two schedulers (or one scheduler ticking twice) fire a given boundary at
/// most once: the loser affects zero rows.
pub async fn advance_schedule(
    pool: &DbPool,
    schedule_id: Uuid,
    expected_next_run: chrono::DateTime<Utc>,
    new_next_run: chrono::DateTime<Utc>,
) -> Result<bool> {
    let mut conn = pool.get().await?;
    let affected = diesel::update(
        schedules::table
            .find(schedule_id)
            .filter(schedules::next_run.eq(expected_next_run)),
    )
    .set((
        schedules::last_run.eq(Utc::now()),
        schedules::next_run.eq(new_next_run),
    ))
    .execute(&mut conn)
    .await?;
    Ok(affected == 1)
}

//
// Dashboard statistics
//

#[derive(Debug, Clone, serde::Serialize)]
pub struct Stats {
    pub total_jobs: i64,
    pub active_jobs: i64,
    pub total_pdfs: i64,
    pub technical_pdfs: i64,
    pub uploaded_pdfs: i64,
    pub active_schedules: i64,
    pub bulk_jobs: i64,
}

pub async fn stats(pool: &DbPool) -> Result<Stats> {
    let mut conn = pool.get().await?;

    let total_jobs: i64 = jobs::table
        .filter(jobs::kind.eq(JobKind::Crawl))
        .count()
        .get_result(&mut conn)
        .await?;
    let bulk_jobs: i64 = jobs::table
        .filter(jobs::kind.eq(JobKind::BulkUpload))
        .count()
        .get_result(&mut conn)
        .await?;
    let active_jobs: i64 = jobs::table
        .filter(jobs::status.eq_any(JobStatus::active_states()))
        .count()
        .get_result(&mut conn)
        .await?;
    let total_pdfs: i64 = discovered_pdfs::table.count().get_result(&mut conn).await?;
    let technical_pdfs: i64 = discovered_pdfs::table
        .filter(discovered_pdfs::is_technical.eq(true))
        .count()
        .get_result(&mut conn)
        .await?;
    let uploaded_pdfs: i64 = discovered_pdfs::table
        .filter(discovered_pdfs::sharepoint_uploaded.eq(true))
        .count()
        .get_result(&mut conn)
        .await?;
    let active_schedules: i64 = schedules::table
        .filter(schedules::enabled.eq(true))
        .count()
        .get_result(&mut conn)
        .await?;

    Ok(Stats {
        total_jobs,
        active_jobs,
        total_pdfs,
        technical_pdfs,
        uploaded_pdfs,
        active_schedules,
        bulk_jobs,
    })
}
