//! Job supervisor: owns every worker subprocess.
//!
//! Each admitted job runs in its own OS process (its own process group), so
//! a wedged headless browser or a stuck model call can never stall the API.
//! The supervisor enforces the state machine edge into `crawling` before
//! spawning, caps concurrent workers, captures child output into a bounded
//! ring buffer, escalates cancellation from SIGTERM to SIGKILL after the
//! grace period, and sweeps orphaned jobs at startup.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

use core_dhv::{TimeUnit, get_max_concurrency, get_poll_interval};
use data_model_dhv::db::DbPool;
use data_model_dhv::models::JobStatus;
use data_model_dhv::store;

/// Lines of child output retained per worker.
const RING_LINES: usize = 200;

/// At most this much of the ring is persisted to the store.
const TAIL_BYTES: usize = 8 * 1024;

/// Soft per-job wall clock; hitting it converts to a cancellation.
const JOB_WALL_CLOCK: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_concurrent_jobs: usize,
    pub grace: Duration,
    pub poll: Duration,
    pub worker_bin: PathBuf,
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        let worker_bin = std::env::var("WORKER_BIN").map(PathBuf::from).unwrap_or_else(|_| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join("worker-dhv")))
                .unwrap_or_else(|| PathBuf::from("worker-dhv"))
        });

        Self {
            max_concurrent_jobs: get_max_concurrency("MAX_CONCURRENT_JOBS", 8) as usize,
            grace: get_poll_interval(TimeUnit::Seconds, "WORKER_GRACE_SECONDS", 10),
            poll: get_poll_interval(TimeUnit::Milliseconds, "SUPERVISOR_POLL_INTERVAL_MS", 1_000),
            worker_bin,
        }
    }
}

type OutputRing = Arc<Mutex<VecDeque<String>>>;

struct WorkerHandle {
    child: Child,
    pid: i32,
    started_at: Instant,
    ring: OutputRing,
    term_sent_at: Option<Instant>,
}

pub struct Supervisor {
    pool: DbPool,
    config: SupervisorConfig,
    children: HashMap<Uuid, WorkerHandle>,
}

impl Supervisor {
    pub fn new(pool: DbPool, config: SupervisorConfig) -> Self {
        tracing::info!(
            "Supervisor configured: max {} concurrent jobs, {:?} grace, worker binary {:?}",
            config.max_concurrent_jobs,
            config.grace,
            config.worker_bin
        );
        Self {
            pool,
            config,
            children: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.orphan_sweep().await {
            tracing::error!("Orphan sweep failed: {}", e);
        }

        loop {
            self.reap_exited().await;
            self.enforce_cancellations().await;
            self.admit_pending().await;
            tokio::time::sleep(self.config.poll).await;
        }
    }

    /// On startup, every job left in a non-terminal state by a previous
    /// supervisor is resolved: pending jobs stay queued, anything else whose
    /// worker is gone becomes `failed` ("worker lost"). A leftover live
    /// worker is killed first so at most one worker ever exists per job.
    async fn orphan_sweep(&self) -> Result<(), store::StoreError> {
        let jobs = store::list_active_jobs(&self.pool).await?;
        for job in jobs {
            if job.status == JobStatus::Pending {
                continue;
            }
            if let Some(pid) = job.worker_pid {
                if pid_alive(pid) {
                    tracing::warn!(
                        "Killing leftover worker (pid {}) for job {} from a previous run",
                        pid,
                        job.id
                    );
                    let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
                }
            }
            tracing::warn!("Job {} lost its worker; marking failed", job.id);
            let _ = store::mark_failed(&self.pool, job.id, "worker lost", None).await;
        }
        Ok(())
    }

    /// Collects exited children and resolves their jobs' terminal states.
    async fn reap_exited(&mut self) {
        let mut exited = Vec::new();
        for (job_id, handle) in self.children.iter_mut() {
            match handle.child.try_wait() {
                Ok(Some(status)) => exited.push((*job_id, status)),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Failed to poll worker for job {}: {}", job_id, e);
                }
            }
        }

        for (job_id, status) in exited {
            let handle = self.children.remove(&job_id).expect("exited child tracked");
            let tail = ring_tail(&handle.ring).await;
            self.resolve_exit(job_id, status.success(), status.code(), tail).await;
        }
    }

    async fn resolve_exit(
        &self,
        job_id: Uuid,
        success: bool,
        code: Option<i32>,
        tail: Option<String>,
    ) {
        let job = match store::get_job(&self.pool, job_id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!("Reaped worker for unknown job {}: {}", job_id, e);
                return;
            }
        };

        if job.status.is_terminal() {
            // The worker wrote its own terminal state (completed or failed
            // with a recorded reason) before exiting.
            let _ = store::clear_worker_pid(&self.pool, job_id).await;
            tracing::info!("Worker for job {} exited; final status {}", job_id, job.status.as_str());
            return;
        }

        if job.cancel_requested {
            // Only now, after the reap, does the job become `cancelled`.
            let _ = store::mark_cancelled(&self.pool, job_id).await;
            tracing::info!("Job {} cancelled (worker reaped)", job_id);
            return;
        }

        let reason = if success {
            "worker exited before completing".to_string()
        } else {
            match code {
                Some(code) => format!("worker exited with status {}", code),
                None => "worker killed by signal".to_string(),
            }
        };
        tracing::error!("Job {} failed: {}", job_id, reason);
        let _ = store::mark_failed(&self.pool, job_id, &reason, tail.as_deref()).await;
    }

    /// Cancellation is cooperative first (the worker polls the flag), then
    /// coercive: SIGTERM to the process group, and SIGKILL once the grace
    /// period has elapsed. The wall-clock timeout converts into the same
    /// cancellation path.
    async fn enforce_cancellations(&mut self) {
        for (job_id, handle) in self.children.iter_mut() {
            let job = match store::get_job(&self.pool, *job_id).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!("Could not read job {} while supervising: {}", job_id, e);
                    continue;
                }
            };

            if !job.cancel_requested && handle.started_at.elapsed() > JOB_WALL_CLOCK {
                tracing::warn!("Job {} exceeded the soft wall-clock limit; requesting cancellation", job_id);
                let _ = store::request_cancel(&self.pool, *job_id).await;
                continue;
            }

            if !job.cancel_requested {
                continue;
            }

            match handle.term_sent_at {
                None => {
                    tracing::info!("Signalling worker group {} (job {}) with SIGTERM", handle.pid, job_id);
                    if let Err(e) = killpg(Pid::from_raw(handle.pid), Signal::SIGTERM) {
                        tracing::warn!("SIGTERM to group {} failed: {}", handle.pid, e);
                    }
                    handle.term_sent_at = Some(Instant::now());
                }
                Some(sent_at) if sent_at.elapsed() > self.config.grace => {
                    tracing::warn!(
                        "Worker group {} (job {}) survived the grace period; sending SIGKILL",
                        handle.pid,
                        job_id
                    );
                    if let Err(e) = killpg(Pid::from_raw(handle.pid), Signal::SIGKILL) {
                        tracing::warn!("SIGKILL to group {} failed: {}", handle.pid, e);
                    }
                }
                Some(_) => {}
            }
        }
    }

    /// Admits pending jobs oldest-first while below the concurrency cap.
    /// The `pending → crawling` edge is persisted before the spawn side
    /// effect; losing that compare-and-set (e.g. to a pre-admission cancel)
    /// skips the job entirely.
    async fn admit_pending(&mut self) {
        let capacity = self
            .config
            .max_concurrent_jobs
            .saturating_sub(self.children.len());
        if capacity == 0 {
            return;
        }

        let pending = match store::pending_jobs_fifo(&self.pool, capacity as i64).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("Failed to read admission queue: {}", e);
                return;
            }
        };

        for job in pending {
            if self.children.contains_key(&job.id) {
                continue;
            }

            let admitted = store::transition_status(
                &self.pool,
                job.id,
                &[JobStatus::Pending],
                JobStatus::Crawling,
            )
            .await;
            match admitted {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::error!("Failed to admit job {}: {}", job.id, e);
                    continue;
                }
            }

            match self.spawn_worker(job.id) {
                Ok(handle) => {
                    tracing::info!("Started worker (pid {}) for job {}", handle.pid, job.id);
                    let _ = store::set_worker_pid(&self.pool, job.id, handle.pid).await;
                    self.children.insert(job.id, handle);
                }
                Err(e) => {
                    tracing::error!("Failed to spawn worker for job {}: {}", job.id, e);
                    let _ = store::mark_failed(
                        &self.pool,
                        job.id,
                        &format!("failed to spawn worker: {}", e),
                        None,
                    )
                    .await;
                }
            }
        }
    }

    /// Spawns `worker-dhv <job-id>` in a fresh process group with captured
    /// output. The fresh group is what lets cancellation kill the whole
    /// tree, headless-browser children included.
    fn spawn_worker(&self, job_id: Uuid) -> std::io::Result<WorkerHandle> {
        let mut command = Command::new(&self.config.worker_bin);
        command
            .arg(job_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(false);

        let mut child = command.spawn()?;
        let pid = child.id().map(|p| p as i32).ok_or_else(|| {
            std::io::Error::other("spawned worker has no pid")
        })?;

        let ring: OutputRing = Arc::new(Mutex::new(VecDeque::with_capacity(RING_LINES)));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(capture_lines(stdout, ring.clone(), job_id));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(capture_lines(stderr, ring.clone(), job_id));
        }

        Ok(WorkerHandle {
            child,
            pid,
            started_at: Instant::now(),
            ring,
            term_sent_at: None,
        })
    }
}

/// Drains one child output stream into the bounded ring buffer.
async fn capture_lines<R>(stream: R, ring: OutputRing, job_id: Uuid)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!("[job: {}] worker: {}", job_id, line);
        let mut ring = ring.lock().await;
        if ring.len() == RING_LINES {
            ring.pop_front();
        }
        ring.push_back(line);
    }
}

async fn ring_tail(ring: &OutputRing) -> Option<String> {
    let ring = ring.lock().await;
    if ring.is_empty() {
        return None;
    }
    let joined = ring.iter().cloned().collect::<Vec<_>>().join("\n");
    if joined.len() > TAIL_BYTES {
        let mut start = joined.len() - TAIL_BYTES;
        while !joined.is_char_boundary(start) {
            start += 1;
        }
        // keep whole lines after the cut
        let trimmed = match joined[start..].find('\n') {
            Some(idx) => &joined[start + idx + 1..],
            None => &joined[start..],
        };
        Some(trimmed.to_string())
    } else {
        Some(joined)
    }
}

fn pid_alive(pid: i32) -> bool {
    nix::sys::signal::kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ring_tail_bounded() {
        let ring: OutputRing = Arc::new(Mutex::new(VecDeque::new()));
        assert_eq!(ring_tail(&ring).await, None);

        {
            let mut guard = ring.lock().await;
            for i in 0..1_000 {
                if guard.len() == RING_LINES {
                    guard.pop_front();
                }
                guard.push_back(format!("line {} {}", i, "x".repeat(100)));
            }
            assert_eq!(guard.len(), RING_LINES);
        }

        let tail = ring_tail(&ring).await.unwrap();
        assert!(tail.len() <= TAIL_BYTES);
        // the newest line survives the truncation
        assert!(tail.contains("line 999"));
    }

    #[test]
    fn test_pid_alive_self() {
        assert!(pid_alive(std::process::id() as i32));
        // pid 0 would signal our own group; a huge pid is safely dead
        assert!(!pid_alive(i32::MAX - 1));
    }
}
