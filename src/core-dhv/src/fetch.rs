//! Two-tier URL fetching.
//!
//! Tier one is a plain pooled HTTP client. When the origin answers with an
//! anti-bot challenge (403/503, or a challenge signature in the body), the
//! fetch is escalated to a headless-browser tier that executes JavaScript.
//! The fetcher never retries; retry policy belongs to the caller.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::browser::PageBrowser;

/// User-Agent presented by the direct tier. Matches a mainstream browser so
/// ordinary origins serve us the same HTML they serve users.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Direct-tier timeout (seconds) unless overridden.
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

const MAX_REDIRECTS: usize = 10;

/// Bodies at or above this size are consumed chunk-wise rather than buffered
/// in one read, so a cancel can interrupt mid-body.
pub const STREAM_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug)]
pub enum FetchError {
    /// The request did not complete within the configured timeout.
    Timeout,
    /// The origin answered with a non-success status (and no anti-bot signature).
    HttpStatus(u16),
    /// Both tiers were refused automated access.
    AntiBotBlock,
    /// The response body was unusable (transport error mid-body, bad encoding).
    InvalidContent(String),
    /// The job's cancellation token fired; any partial download was discarded.
    Cancelled,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Fetch timed out"),
            Self::HttpStatus(code) => write!(f, "HTTP status {}", code),
            Self::AntiBotBlock => write!(f, "Origin refused automated access"),
            Self::InvalidContent(msg) => write!(f, "Invalid content: {}", msg),
            Self::Cancelled => write!(f, "Fetch cancelled"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::HttpStatus(status.as_u16())
        } else {
            Self::InvalidContent(err.to_string())
        }
    }
}

/// A fetched resource: bytes, the MIME type the origin claimed, the URL
/// after redirects, and the Content-Length the origin declared (which can
/// exceed `bytes.len()` for sampled fetches).
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Bytes,
    pub mime: Option<String>,
    pub final_url: Url,
    pub declared_size: Option<u64>,
}

impl Fetched {
    pub fn is_html(&self) -> bool {
        self.mime
            .as_deref()
            .map(|m| m.contains("text/html"))
            .unwrap_or(false)
    }

    pub fn is_pdf(&self) -> bool {
        self.mime
            .as_deref()
            .map(|m| m.contains("application/pdf"))
            .unwrap_or(false)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// True when a response looks like an anti-bot challenge rather than real
/// content. Covers the Cloudflare browser check and Akamai sensor forms.
pub fn is_anti_bot_block(status: u16, body_prefix: &str) -> bool {
    if status == 403 || status == 503 {
        return true;
    }
    let lower = body_prefix.to_lowercase();
    lower.contains("checking your browser")
        || lower.contains("cf-browser-verification")
        || lower.contains("cf-chl")
        || lower.contains("_abck")
        || lower.contains("akam/13")
}

#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    browser: Option<Arc<dyn PageBrowser>>,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .expect("Failed to build HTTP client");
        Self { client, browser: None }
    }

    /// Attach the browser escalation tier. The browser instance is shared
    /// and reused across every URL of the job.
    pub fn with_browser(mut self, browser: Arc<dyn PageBrowser>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetches a URL, escalating to the browser tier on an anti-bot block.
    pub async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<Fetched, FetchError> {
        match self.fetch_direct(url, None, cancel).await {
            Err(FetchError::AntiBotBlock) => self.fetch_via_browser(url).await,
            other => other,
        }
    }

    /// Fetches at most `max_bytes` of the body. Used for classification
    /// samples where the whole document is not needed.
    pub async fn fetch_sample(
        &self,
        url: &Url,
        max_bytes: usize,
        cancel: &CancellationToken,
    ) -> Result<Fetched, FetchError> {
        self.fetch_direct(url, Some(max_bytes), cancel).await
    }

    /// Opens a streaming response for the uploader. Returns the response so
    /// the caller can forward `bytes_stream()` chunk-wise; bodies under
    /// [`STREAM_THRESHOLD_BYTES`] may be buffered by the caller instead.
    pub async fn open_stream(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            r = self.client.get(url.as_str()).send() => r?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        Ok(response)
    }

    async fn fetch_direct(
        &self,
        url: &Url,
        max_bytes: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Fetched, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            r = self.client.get(url.as_str()).send() => r?,
        };

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let declared_size = response.content_length();
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = self.read_body(response, max_bytes, cancel).await?;

        if !(200..300).contains(&status) {
            let prefix = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]).into_owned();
            if is_anti_bot_block(status, &prefix) {
                return Err(FetchError::AntiBotBlock);
            }
            return Err(FetchError::HttpStatus(status));
        }

        // A success status can still carry a challenge interstitial
        if mime.as_deref().map(|m| m.contains("text/html")).unwrap_or(false) {
            let prefix = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]).into_owned();
            if is_anti_bot_block(200, &prefix) && looks_like_challenge_only(&prefix) {
                return Err(FetchError::AntiBotBlock);
            }
        }

        Ok(Fetched { bytes, mime, final_url, declared_size })
    }

    /// Consumes the body chunk-wise, checking the cancellation token between
    /// chunks. A cancelled fetch discards whatever was read.
    async fn read_body(
        &self,
        response: reqwest::Response,
        max_bytes: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let mut buf: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                c = stream.next() => c,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(FetchError::from)?;
            buf.extend_from_slice(&chunk);
            if let Some(limit) = max_bytes {
                if buf.len() >= limit {
                    buf.truncate(limit);
                    break;
                }
            }
        }

        Ok(Bytes::from(buf))
    }

    async fn fetch_via_browser(&self, url: &Url) -> Result<Fetched, FetchError> {
        let Some(browser) = &self.browser else {
            return Err(FetchError::AntiBotBlock);
        };
        tracing::info!("Anti-bot block on '{}', escalating to browser tier", url);
        browser.fetch_page(url).await
    }
}

/// A status-200 challenge page is short and carries no real anchors; a
/// normal page that merely mentions a challenge string should not escalate.
fn looks_like_challenge_only(body_prefix: &str) -> bool {
    body_prefix.len() < 4096 && !body_prefix.contains("<a ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anti_bot_detection_by_status() {
        assert!(is_anti_bot_block(403, ""));
        assert!(is_anti_bot_block(503, ""));
        assert!(!is_anti_bot_block(200, "<html><body>hello</body></html>"));
        assert!(!is_anti_bot_block(404, "not found"));
        assert!(!is_anti_bot_block(500, "oops"));
    }

    #[test]
    fn test_anti_bot_detection_by_body() {
        assert!(is_anti_bot_block(200, "<title>Checking your browser before accessing</title>"));
        assert!(is_anti_bot_block(200, "<div id=\"cf-browser-verification\">"));
        assert!(is_anti_bot_block(200, "var _abck = '...';"));
        assert!(!is_anti_bot_block(200, "<html>Product datasheets</html>"));
    }

    #[test]
    fn test_fetched_mime_helpers() {
        let f = Fetched {
            bytes: Bytes::from_static(b"%PDF-1.7"),
            mime: Some("application/pdf".to_string()),
            final_url: Url::parse("https://example.com/a.pdf").unwrap(),
            declared_size: Some(8),
        };
        assert!(f.is_pdf());
        assert!(!f.is_html());

        let f = Fetched {
            bytes: Bytes::from_static(b"<html></html>"),
            mime: Some("text/html; charset=utf-8".to_string()),
            final_url: Url::parse("https://example.com/").unwrap(),
            declared_size: None,
        };
        assert!(f.is_html());
        assert!(!f.is_pdf());
    }
}
