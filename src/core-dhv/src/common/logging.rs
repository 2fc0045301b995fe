use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes tracing from RUST_LOG, falling back to the given filter.
/// Every binary (API, worker, scheduler) calls this once at startup.
pub fn setup_logging(default_log_settings: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_log_settings.into()))
        .with(tracing_subscriber::fmt::layer())
        .init()
}

/// Span carrying the job id. The worker instruments its whole pipeline with
/// this, so every log line emitted while processing a job is attributable
/// to it without threading the id through each call site.
pub fn job_span(job_id: impl std::fmt::Display) -> tracing::Span {
    tracing::info_span!("job", id = %job_id)
}
