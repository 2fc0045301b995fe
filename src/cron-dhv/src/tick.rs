//! Recurring-recrawl firing.
//!
//! Every enabled schedule whose `next_run` has passed is fired: its template
//! is cloned into a fresh `pending` job for the supervisor to pick up. The
//! compare-and-set on `next_run` makes firing idempotent: two ticks (or two
//! scheduler instances) observing the same boundary fire at most one job.
//! A boundary missed while the scheduler was down fires on the first poll
//! after startup, because `next_run` is simply in the past by then.

use chrono::Utc;

use data_model_dhv::db::DbPool;
use data_model_dhv::models::{NewJob, Schedule, next_sunday_midnight};
use data_model_dhv::store;

use crate::Error;

/// Fires all due schedules. Returns how many jobs were created.
pub async fn poll_and_fire(pool: &DbPool) -> Result<usize, Error> {
    let now = Utc::now();
    let due = store::due_schedules(pool, now).await?;
    if due.is_empty() {
        return Ok(0);
    }
    tracing::info!("{} schedule(s) due", due.len());

    let mut fired = 0;
    for schedule in due {
        match fire_schedule(pool, &schedule).await {
            Ok(true) => fired += 1,
            Ok(false) => {
                tracing::debug!("Schedule {} already advanced by another firing", schedule.id);
            }
            Err(e) => {
                tracing::error!("Failed to fire schedule {}: {}", schedule.id, e);
            }
        }
    }
    Ok(fired)
}

async fn fire_schedule(pool: &DbPool, schedule: &Schedule) -> Result<bool, Error> {
    let next_run = next_sunday_midnight(Utc::now());

    // Advance the boundary first; creating the job is the side effect and
    // only the CAS winner performs it.
    if !store::advance_schedule(pool, schedule.id, schedule.next_run, next_run).await? {
        return Ok(false);
    }

    // The cloned job does not re-register its schedule on completion
    let new_job = NewJob::crawl(
        schedule.manufacturer_name.clone(),
        schedule.domain.clone(),
        schedule.product_lines.clone(),
        schedule.sharepoint_folder.clone(),
        false,
    );
    let job = store::create_job(pool, new_job).await?;

    tracing::info!(
        "Schedule {} fired: created recrawl job {} for '{}' (next run {})",
        schedule.id,
        job.id,
        schedule.domain,
        next_run
    );
    Ok(true)
}
