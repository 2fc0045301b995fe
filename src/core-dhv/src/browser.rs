//! Headless-browser escalation tier.
//!
//! The browser is only consulted when the direct HTTP tier hits an anti-bot
//! challenge. One Chromium instance is launched lazily per job and reused for
//! every escalated URL; the supervisor's process-group kill guarantees the
//! browser dies with the worker even when cooperative shutdown is missed.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use url::Url;

use crate::fetch::{FetchError, Fetched};

/// The seam between the fetcher and whatever renders JavaScript for it.
#[async_trait]
pub trait PageBrowser: Send + Sync {
    /// Loads the page with JavaScript enabled and returns the rendered DOM.
    async fn fetch_page(&self, url: &Url) -> Result<Fetched, FetchError>;

    /// Tears the browser down. Called when the job ends.
    async fn shutdown(&self);
}

struct LaunchedBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

/// Chromium over the DevTools protocol.
pub struct ChromiumBrowser {
    launched: Mutex<Option<LaunchedBrowser>>,
}

impl ChromiumBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            launched: Mutex::new(None),
        })
    }

    async fn launch() -> Result<LaunchedBrowser, FetchError> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(FetchError::InvalidContent)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::InvalidContent(format!("Browser launch failed: {}", e)))?;

        // The handler stream must be driven for the browser connection to
        // make progress; it ends when the browser closes.
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(LaunchedBrowser { browser, handler_task })
    }
}

#[async_trait]
impl PageBrowser for ChromiumBrowser {
    async fn fetch_page(&self, url: &Url) -> Result<Fetched, FetchError> {
        let mut guard = self.launched.lock().await;
        if guard.is_none() {
            tracing::info!("Launching headless browser");
            *guard = Some(Self::launch().await?);
        }
        let launched = guard.as_ref().expect("browser launched above");

        let page = launched
            .browser
            .new_page(url.as_str())
            .await
            .map_err(|e| FetchError::InvalidContent(format!("Browser navigation failed: {}", e)))?;

        page.wait_for_navigation()
            .await
            .map_err(|e| FetchError::InvalidContent(format!("Browser navigation failed: {}", e)))?;

        let html = page
            .content()
            .await
            .map_err(|e| FetchError::InvalidContent(format!("Failed to read rendered DOM: {}", e)))?;

        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close browser page for '{}': {}", url, e);
        }

        // A challenge that Chromium itself could not pass leaves the
        // interstitial text in the rendered DOM. Sensor scripts (e.g. the
        // Akamai cookie) appear on legitimate pages too and must not count.
        let prefix: String = html.chars().take(4096).collect::<String>().to_lowercase();
        if prefix.contains("checking your browser") || prefix.contains("cf-browser-verification") {
            return Err(FetchError::AntiBotBlock);
        }

        Ok(Fetched {
            bytes: Bytes::from(html),
            mime: Some("text/html".to_string()),
            final_url: url.clone(),
            declared_size: None,
        })
    }

    async fn shutdown(&self) {
        let mut guard = self.launched.lock().await;
        if let Some(mut launched) = guard.take() {
            if let Err(e) = launched.browser.close().await {
                tracing::warn!("Failed to close browser cleanly: {}", e);
            }
            launched.handler_task.abort();
        }
    }
}

/// Browser stand-in for tests: serves canned HTML per URL.
pub struct MockBrowser {
    pages: std::collections::HashMap<String, String>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            pages: std::collections::HashMap::new(),
        }
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageBrowser for MockBrowser {
    async fn fetch_page(&self, url: &Url) -> Result<Fetched, FetchError> {
        match self.pages.get(url.as_str()) {
            Some(html) => Ok(Fetched {
                bytes: Bytes::from(html.clone()),
                mime: Some("text/html".to_string()),
                final_url: url.clone(),
                declared_size: None,
            }),
            None => Err(FetchError::AntiBotBlock),
        }
    }

    async fn shutdown(&self) {}
}
