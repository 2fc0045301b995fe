//! Transfers PDFs into a SharePoint document library via Microsoft Graph.
//!
//! Dedup happens before any bytes move: the destination folder's children
//! are listed and compared against the ArtifactKey `(folder, filename,
//! size)`. A matching key means the artifact is already present and the
//! transfer is skipped; a name collision with a different size picks the
//! next free `(_2)`, `(_3)`, … suffix. Files are uploaded under a temporary
//! name and renamed into place so readers never observe a partial document.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::fetch::{DEFAULT_TIMEOUT_SECS, FetchError, Fetcher, STREAM_THRESHOLD_BYTES};

use super::auth::{IdentityConfig, TokenCache};
use super::{DocumentStore, UploadError};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Chunk size for upload sessions. Graph requires a multiple of 320 KiB;
/// 4 MiB is the cap per the transfer contract.
const CHUNK_SIZE: usize = 4 * 1024 * 1024;

const CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_ATTEMPTS: u32 = 3;

/// The dedup key: two uploads with the same key are the same artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub folder: String,
    pub filename: String,
    pub size_bytes: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Bytes were moved and the artifact is now at the destination.
    Uploaded,
    /// An artifact with the same key already existed; nothing was moved.
    SkippedDuplicate,
}

/// What to do given the destination folder's current contents.
#[derive(Debug, PartialEq, Eq)]
pub enum UploadPlan {
    /// Same name and size already present.
    Skip,
    /// Upload under this (possibly suffixed) final name.
    UploadAs(String),
}

/// Pure dedup/collision decision. `children` maps existing names to sizes.
pub fn plan_upload(children: &HashMap<String, i64>, key: &ArtifactKey) -> UploadPlan {
    match children.get(&key.filename) {
        Some(size) if *size == key.size_bytes => UploadPlan::Skip,
        None => UploadPlan::UploadAs(key.filename.clone()),
        Some(_) => {
            // name taken by a different artifact: find the next free suffix
            let (stem, ext) = split_extension(&key.filename);
            let mut n = 2;
            loop {
                let candidate = format!("{}(_{}){}", stem, n, ext);
                match children.get(&candidate) {
                    Some(size) if *size == key.size_bytes => return UploadPlan::Skip,
                    None => return UploadPlan::UploadAs(candidate),
                    Some(_) => n += 1,
                }
            }
        }
    }
}

fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename.split_at(idx),
        _ => (filename, ""),
    }
}

pub struct SharePointUploader {
    client: reqwest::Client,
    /// Pulls artifact bytes from their source URLs. Plain direct tier; PDFs
    /// needing the browser tier are not a thing the destination can fix.
    fetcher: Fetcher,
    auth: TokenCache,
    site_url: String,
    ids: OnceCell<(String, String)>,
}

impl SharePointUploader {
    /// Builds an uploader from `IDENTITY_*` and `SHAREPOINT_SITE_URL`.
    /// Returns None when credentials are absent (callers decide whether
    /// that is fatal; tests and dry runs proceed without uploads).
    pub fn from_env() -> Option<Self> {
        let config = IdentityConfig::from_env()?;
        let site_url = std::env::var("SHAREPOINT_SITE_URL").ok()?;
        let client = reqwest::Client::builder()
            .timeout(CHUNK_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Some(Self {
            auth: TokenCache::new(config, client.clone()),
            client,
            fetcher: Fetcher::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            site_url,
            ids: OnceCell::new(),
        })
    }

    /// Moves one artifact from its source URL into `<folder>/<filename>`,
    /// deduplicating against the destination and retrying transient
    /// failures with 1 s / 2 s / 4 s backoff.
    pub async fn transfer(
        &self,
        source_url: &Url,
        folder: &str,
        filename: &str,
        expected_size: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, UploadError> {
        let mut attempt = 0;
        loop {
            match self
                .try_transfer(source_url, folder, filename, expected_size, cancel)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = e
                        .retry_after()
                        .unwrap_or(1u64 << attempt);
                    tracing::warn!(
                        "Transient upload failure for '{}' (attempt {}/{}): {}; retrying in {}s",
                        filename,
                        attempt + 1,
                        MAX_ATTEMPTS,
                        e,
                        backoff
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_transfer(
        &self,
        source_url: &Url,
        folder: &str,
        filename: &str,
        expected_size: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let folder_id = self.ensure_folder(folder).await?;
        let children = self.list_children(&folder_id).await?;

        // Large bodies are streamed straight from the source into an upload
        // session; small ones are buffered for a single PUT.
        if let Some(size) = expected_size.filter(|s| *s >= STREAM_THRESHOLD_BYTES as i64) {
            let key = ArtifactKey {
                folder: folder.to_string(),
                filename: filename.to_string(),
                size_bytes: size,
            };
            let final_name = match plan_upload(&children, &key) {
                UploadPlan::Skip => {
                    tracing::info!("Skipping duplicate artifact '{}' in '{}'", filename, folder);
                    return Ok(TransferOutcome::SkippedDuplicate);
                }
                UploadPlan::UploadAs(name) => name,
            };
            let response = self
                .fetcher
                .open_stream(source_url, cancel)
                .await
                .map_err(map_fetch_error)?;
            let total = response.content_length().unwrap_or(size as u64);
            self.upload_streamed(&folder_id, &final_name, response, total, cancel)
                .await?;
        } else {
            let fetched = self
                .fetcher
                .fetch(source_url, cancel)
                .await
                .map_err(map_fetch_error)?;
            let key = ArtifactKey {
                folder: folder.to_string(),
                filename: filename.to_string(),
                size_bytes: fetched.bytes.len() as i64,
            };
            let final_name = match plan_upload(&children, &key) {
                UploadPlan::Skip => {
                    tracing::info!("Skipping duplicate artifact '{}' in '{}'", filename, folder);
                    return Ok(TransferOutcome::SkippedDuplicate);
                }
                UploadPlan::UploadAs(name) => name,
            };
            self.upload_buffered(&folder_id, &final_name, fetched.bytes, cancel)
                .await?;
        }

        Ok(TransferOutcome::Uploaded)
    }

    /// Uploads small files: PUT to a temporary name, then rename into place.
    async fn upload_buffered(
        &self,
        folder_id: &str,
        final_name: &str,
        bytes: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let temp_name = temp_upload_name(final_name);
        let (site_id, _) = self.site_and_drive().await?;
        let url = format!(
            "{}/sites/{}/drive/items/{}:/{}:/content",
            GRAPH_BASE, site_id, folder_id, temp_name
        );

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            r = self.authed_request(|token| {
                self.client
                    .put(&url)
                    .bearer_auth(token)
                    .header(reqwest::header::CONTENT_TYPE, "application/pdf")
                    .body(bytes.clone())
            }) => r?,
        };

        let item: Value = response
            .json()
            .await
            .map_err(UploadError::Http)?;
        let item_id = item["id"]
            .as_str()
            .ok_or_else(|| UploadError::Auth("Upload response missing item id".to_string()))?;

        self.rename_item(item_id, final_name).await
    }

    /// Uploads large files through an upload session in ≤ 4 MiB chunks.
    async fn upload_streamed(
        &self,
        folder_id: &str,
        final_name: &str,
        response: reqwest::Response,
        total: u64,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let temp_name = temp_upload_name(final_name);
        let (site_id, _) = self.site_and_drive().await?;
        let session_url = format!(
            "{}/sites/{}/drive/items/{}:/{}:/createUploadSession",
            GRAPH_BASE, site_id, folder_id, temp_name
        );

        let session: Value = self
            .authed_request(|token| self.client.post(&session_url).bearer_auth(token).json(&json!({})))
            .await?
            .json()
            .await
            .map_err(UploadError::Http)?;
        let upload_url = session["uploadUrl"]
            .as_str()
            .ok_or_else(|| UploadError::Auth("Upload session missing uploadUrl".to_string()))?
            .to_string();

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::with_capacity(CHUNK_SIZE);
        let mut offset: u64 = 0;
        let mut last_item: Option<Value> = None;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                c = stream.next() => c,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while buffer.len() >= CHUNK_SIZE {
                        let chunk_bytes: Vec<u8> = buffer.drain(..CHUNK_SIZE).collect();
                        last_item = Some(
                            self.put_chunk(&upload_url, chunk_bytes, &mut offset, total, cancel)
                                .await?,
                        );
                    }
                }
                Some(Err(e)) => return Err(UploadError::Http(e)),
                None => break,
            }
        }

        if !buffer.is_empty() {
            let chunk_bytes = std::mem::take(&mut buffer);
            last_item = Some(
                self.put_chunk(&upload_url, chunk_bytes, &mut offset, total, cancel)
                    .await?,
            );
        }

        let item_id = last_item
            .as_ref()
            .and_then(|v| v["id"].as_str())
            .ok_or_else(|| UploadError::Auth("Upload session completed without an item id".to_string()))?
            .to_string();

        self.rename_item(&item_id, final_name).await
    }

    async fn put_chunk(
        &self,
        upload_url: &str,
        chunk: Vec<u8>,
        offset: &mut u64,
        total: u64,
        cancel: &CancellationToken,
    ) -> Result<Value, UploadError> {
        let start = *offset;
        let end = start + chunk.len() as u64 - 1;
        *offset = end + 1;

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            // the session uploadUrl is pre-authenticated; no bearer needed
            r = self
                .client
                .put(upload_url)
                .header(reqwest::header::CONTENT_LENGTH, chunk.len())
                .header(
                    reqwest::header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, total),
                )
                .timeout(CHUNK_TIMEOUT)
                .body(chunk)
                .send() => r.map_err(UploadError::Http)?,
        };

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(status_error(response).await);
        }
        response.json().await.map_err(UploadError::Http)
    }

    async fn rename_item(&self, item_id: &str, final_name: &str) -> Result<(), UploadError> {
        let (site_id, _) = self.site_and_drive().await?;
        let url = format!("{}/sites/{}/drive/items/{}", GRAPH_BASE, site_id, item_id);
        let body = json!({
            "name": final_name,
            "@microsoft.graph.conflictBehavior": "replace",
        });
        self.authed_request(|token| self.client.patch(&url).bearer_auth(token).json(&body))
            .await?;
        Ok(())
    }

    /// Resolves (and caches) the site id and default drive id.
    async fn site_and_drive(&self) -> Result<&(String, String), UploadError> {
        self.ids
            .get_or_try_init(|| async {
                let (domain, site_path) = parse_site_url(&self.site_url)?;

                let site_url = format!("{}/sites/{}:/sites/{}", GRAPH_BASE, domain, site_path);
                let site: Value = self
                    .authed_request(|token| self.client.get(&site_url).bearer_auth(token))
                    .await?
                    .json()
                    .await
                    .map_err(UploadError::Http)?;
                let site_id = site["id"]
                    .as_str()
                    .ok_or_else(|| UploadError::Auth("Site lookup returned no id".to_string()))?
                    .to_string();

                let drive_url = format!("{}/sites/{}/drive", GRAPH_BASE, site_id);
                let drive: Value = self
                    .authed_request(|token| self.client.get(&drive_url).bearer_auth(token))
                    .await?
                    .json()
                    .await
                    .map_err(UploadError::Http)?;
                let drive_id = drive["id"]
                    .as_str()
                    .ok_or_else(|| UploadError::Auth("Drive lookup returned no id".to_string()))?
                    .to_string();

                Ok((site_id, drive_id))
            })
            .await
    }

    /// Walks the destination path, creating missing folders, and returns the
    /// terminal folder's item id.
    pub async fn ensure_folder(&self, folder_path: &str) -> Result<String, UploadError> {
        let (site_id, _) = self.site_and_drive().await?;
        let mut parent_id = "root".to_string();

        for segment in folder_path.split('/').map(str::trim).filter(|s| !s.is_empty()) {
            let children = self.list_children_raw(&parent_id).await?;
            let existing = children.iter().find_map(|item| {
                (item["name"].as_str() == Some(segment) && item.get("folder").is_some())
                    .then(|| item["id"].as_str().map(str::to_string))
                    .flatten()
            });

            parent_id = match existing {
                Some(id) => id,
                None => {
                    let url = format!(
                        "{}/sites/{}/drive/items/{}/children",
                        GRAPH_BASE, site_id, parent_id
                    );
                    let body = json!({
                        "name": segment,
                        "folder": {},
                        "@microsoft.graph.conflictBehavior": "fail",
                    });
                    let created: Value = self
                        .authed_request(|token| self.client.post(&url).bearer_auth(token).json(&body))
                        .await?
                        .json()
                        .await
                        .map_err(UploadError::Http)?;
                    tracing::info!("Created destination folder '{}'", segment);
                    created["id"]
                        .as_str()
                        .ok_or_else(|| UploadError::Auth("Folder create returned no id".to_string()))?
                        .to_string()
                }
            };
        }

        Ok(parent_id)
    }

    /// Names and sizes of the folder's current files, for dedup planning.
    async fn list_children(&self, folder_id: &str) -> Result<HashMap<String, i64>, UploadError> {
        let children = self.list_children_raw(folder_id).await?;
        Ok(children
            .iter()
            .filter(|item| item.get("file").is_some())
            .filter_map(|item| {
                let name = item["name"].as_str()?.to_string();
                let size = item["size"].as_i64()?;
                Some((name, size))
            })
            .collect())
    }

    async fn list_children_raw(&self, item_id: &str) -> Result<Vec<Value>, UploadError> {
        let (site_id, _) = self.site_and_drive().await?;
        let url = format!(
            "{}/sites/{}/drive/items/{}/children?$top=999",
            GRAPH_BASE, site_id, item_id
        );
        let body: Value = self
            .authed_request(|token| self.client.get(&url).bearer_auth(token))
            .await?
            .json()
            .await
            .map_err(UploadError::Http)?;
        Ok(body["value"].as_array().cloned().unwrap_or_default())
    }

    /// Runs a Graph request with a bearer token; on 401 the token cache is
    /// invalidated and the request retried once with a fresh grant. A second
    /// 401 is terminal.
    async fn authed_request<F>(&self, build: F) -> Result<reqwest::Response, UploadError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.auth.bearer_token().await?;
        let response = build(&token).send().await.map_err(UploadError::Http)?;

        if response.status().as_u16() == 401 {
            tracing::warn!("Document store answered 401; renewing bearer token");
            self.auth.invalidate().await;
            let token = self.auth.bearer_token().await?;
            let retry = build(&token).send().await.map_err(UploadError::Http)?;
            if !retry.status().is_success() {
                return Err(status_error(retry).await);
            }
            return Ok(retry);
        }

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl DocumentStore for SharePointUploader {
    async fn transfer(
        &self,
        source_url: &Url,
        folder: &str,
        filename: &str,
        expected_size: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, UploadError> {
        SharePointUploader::transfer(self, source_url, folder, filename, expected_size, cancel).await
    }
}

fn temp_upload_name(final_name: &str) -> String {
    format!("{}.uploading", final_name)
}

fn map_fetch_error(e: FetchError) -> UploadError {
    match e {
        FetchError::Cancelled => UploadError::Cancelled,
        FetchError::Timeout => UploadError::Status {
            code: 408,
            detail: "source fetch timed out".to_string(),
            retry_after: None,
        },
        FetchError::HttpStatus(code) => UploadError::Status {
            code,
            detail: "source fetch failed".to_string(),
            retry_after: None,
        },
        other => UploadError::Status {
            code: 502,
            detail: format!("source fetch failed: {}", other),
            retry_after: None,
        },
    }
}

async fn status_error(response: reqwest::Response) -> UploadError {
    let code = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let detail = response.text().await.unwrap_or_default();
    let detail = detail.chars().take(512).collect();
    UploadError::Status { code, detail, retry_after }
}

/// Splits `https://tenant.sharepoint.com/sites/Docs` into the host and the
/// site path.
fn parse_site_url(site_url: &str) -> Result<(String, String), UploadError> {
    let stripped = site_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    match stripped.split_once("/sites/") {
        Some((domain, path)) if !domain.is_empty() && !path.is_empty() => {
            Ok((domain.to_string(), path.trim_matches('/').to_string()))
        }
        _ => Err(UploadError::Auth(format!(
            "SHAREPOINT_SITE_URL must look like https://<tenant>/sites/<site>, got '{}'",
            site_url
        ))),
    }
}
