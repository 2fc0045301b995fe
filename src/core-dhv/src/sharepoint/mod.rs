pub mod auth;
pub mod memory;
pub mod upload;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use auth::{IdentityConfig, TokenCache};
pub use memory::MemoryStore;
pub use upload::{ArtifactKey, SharePointUploader, TransferOutcome};

/// Destination for harvested documents. The production implementation is
/// [`SharePointUploader`]; [`MemoryStore`] backs tests and dry runs.
///
/// Implementations own dedup: a transfer whose artifact key already exists
/// at the destination reports `SkippedDuplicate` without moving bytes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn transfer(
        &self,
        source_url: &Url,
        folder: &str,
        filename: &str,
        expected_size: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, UploadError>;
}

/// Upload failure taxonomy. Transient failures are retried by the uploader
/// itself (3 attempts, exponential backoff); terminal failures are recorded
/// on the artifact and never fail the job.
#[derive(Debug)]
pub enum UploadError {
    /// The identity provider refused or the grant is misconfigured.
    Auth(String),
    /// Transport-level failure (DNS, connect, mid-body).
    Http(reqwest::Error),
    /// Non-success HTTP status from the document store.
    Status {
        code: u16,
        detail: String,
        retry_after: Option<u64>,
    },
    /// Uploader credentials are not configured at all.
    NotConfigured,
    /// The job was cancelled mid-transfer.
    Cancelled,
}

impl UploadError {
    /// Transient per the retry policy: 5xx, 408, 429, and network timeouts.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { code, .. } => *code >= 500 || *code == 408 || *code == 429,
            Self::Auth(_) | Self::NotConfigured | Self::Cancelled => false,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            Self::Http(e) => write!(f, "HTTP error: {}", e),
            Self::Status { code, detail, .. } => write!(f, "HTTP {}: {}", code, detail),
            Self::NotConfigured => write!(f, "Document store credentials not configured"),
            Self::Cancelled => write!(f, "Upload cancelled"),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient = |code| UploadError::Status { code, detail: String::new(), retry_after: None };
        assert!(transient(500).is_transient());
        assert!(transient(503).is_transient());
        assert!(transient(408).is_transient());
        assert!(transient(429).is_transient());

        assert!(!transient(401).is_transient());
        assert!(!transient(403).is_transient());
        assert!(!transient(413).is_transient());
        assert!(!transient(415).is_transient());
        assert!(!UploadError::NotConfigured.is_transient());
        assert!(!UploadError::Cancelled.is_transient());
    }
}
