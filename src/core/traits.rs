use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use super::errors::Result;
use super::types::FileRegistration;

/// One part handed to the remote store.
#[derive(Debug, Clone)]
pub struct PartUpload {
    /// Groups all parts of one file
    pub upload_id: String,
    pub file_name: String,
    pub part_name: String,
    pub part_number: u32,
    pub channel_id: Option<i64>,
    pub encrypted: bool,
    pub data: Bytes,
}

/// Acknowledgement for a durably stored part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartReceipt {
    pub part_id: i64,
    pub channel_id: i64,
    pub size: u64,
}

/// Remote resource API consumed by the orchestrator.
///
/// Every call takes the issuing item's cancellation token and must resolve to
/// [`UploadError::Aborted`](super::errors::UploadError::Aborted) once it fires.
/// A duplicate name is reported as
/// [`UploadError::AlreadyExists`](super::errors::UploadError::AlreadyExists).
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create a folder, returning the id the remote assigned to it, if any.
    async fn create_folder(
        &self,
        name: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>>;

    /// Whether a file with `name` is already present under `path`.
    async fn file_exists(&self, name: &str, path: &str, cancel: &CancellationToken) -> Result<bool>;

    async fn upload_part(&self, part: PartUpload, cancel: &CancellationToken) -> Result<PartReceipt>;

    /// Register a fully stored file with the remote index.
    async fn register_file(
        &self,
        registration: &FileRegistration,
        cancel: &CancellationToken,
    ) -> Result<Option<String>>;
}

/// Callbacks fired by the chunk engine while a file is in flight.
pub trait TransferObserver: Send + Sync {
    fn on_total_chunks(&self, total: usize);

    /// Byte-weighted percentage in [0, 100]
    fn on_progress(&self, progress: f64);

    fn on_chunks_completed(&self, completed: usize);
}

/// Observer that drops every notification.
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_total_chunks(&self, _total: usize) {}

    fn on_progress(&self, _progress: f64) {}

    fn on_chunks_completed(&self, _completed: usize) {}
}
