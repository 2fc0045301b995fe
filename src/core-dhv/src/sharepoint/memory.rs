//! In-memory document store.
//!
//! Backs tests and credential-less dry runs with the same dedup and
//! collision semantics as the real destination: same key skips, same name
//! with a different size picks the next free suffix.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::upload::{ArtifactKey, TransferOutcome, UploadPlan, plan_upload};
use super::{DocumentStore, UploadError};

#[derive(Default)]
struct Inner {
    /// folder path -> (filename -> size)
    folders: HashMap<String, HashMap<String, i64>>,
    uploaded: usize,
    skipped: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files currently held in a folder, sorted by name.
    pub fn files_in(&self, folder: &str) -> Vec<(String, i64)> {
        let inner = self.inner.lock().expect("memory store lock");
        let mut files: Vec<(String, i64)> = inner
            .folders
            .get(folder)
            .map(|f| f.iter().map(|(n, s)| (n.clone(), *s)).collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// How many transfers actually moved bytes.
    pub fn uploaded_count(&self) -> usize {
        self.inner.lock().expect("memory store lock").uploaded
    }

    /// How many transfers were skipped as duplicates.
    pub fn skipped_count(&self) -> usize {
        self.inner.lock().expect("memory store lock").skipped
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn transfer(
        &self,
        _source_url: &Url,
        folder: &str,
        filename: &str,
        expected_size: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let key = ArtifactKey {
            folder: folder.to_string(),
            filename: filename.to_string(),
            size_bytes: expected_size.unwrap_or(0),
        };

        let mut inner = self.inner.lock().expect("memory store lock");
        let plan = {
            let children = inner.folders.entry(folder.to_string()).or_default();
            plan_upload(children, &key)
        };
        match plan {
            UploadPlan::Skip => {
                inner.skipped += 1;
                Ok(TransferOutcome::SkippedDuplicate)
            }
            UploadPlan::UploadAs(final_name) => {
                inner
                    .folders
                    .get_mut(folder)
                    .expect("folder created above")
                    .insert(final_name, key.size_bytes);
                inner.uploaded += 1;
                Ok(TransferOutcome::Uploaded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://acme.example.com/docs/a.pdf").unwrap()
    }

    #[tokio::test]
    async fn test_transfer_then_skip() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();

        let first = store
            .transfer(&url(), "/Docs/Acme", "a.pdf", Some(100), &cancel)
            .await
            .unwrap();
        assert_eq!(first, TransferOutcome::Uploaded);

        let second = store
            .transfer(&url(), "/Docs/Acme", "a.pdf", Some(100), &cancel)
            .await
            .unwrap();
        assert_eq!(second, TransferOutcome::SkippedDuplicate);

        assert_eq!(store.uploaded_count(), 1);
        assert_eq!(store.skipped_count(), 1);
        assert_eq!(store.files_in("/Docs/Acme"), vec![("a.pdf".to_string(), 100)]);
    }

    #[tokio::test]
    async fn test_collision_suffix() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();

        store.transfer(&url(), "/Docs/Acme", "a.pdf", Some(100), &cancel).await.unwrap();
        store.transfer(&url(), "/Docs/Acme", "a.pdf", Some(200), &cancel).await.unwrap();

        assert_eq!(
            store.files_in("/Docs/Acme"),
            vec![("a(_2).pdf".to_string(), 200), ("a.pdf".to_string(), 100)]
        );
    }

    #[tokio::test]
    async fn test_cancelled_transfer() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = store.transfer(&url(), "/Docs/Acme", "a.pdf", Some(1), &cancel).await;
        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert_eq!(store.uploaded_count(), 0);
    }
}
