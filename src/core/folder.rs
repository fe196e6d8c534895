use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use super::errors::{Result, TransferOutcome, UploadError};
use super::traits::RemoteApi;
use super::types::{ItemStatus, UploadItem};

/// Display status of a folder, recomputed from its children on every call.
///
/// Precedence: any cancelled child, then any failed child, then all children
/// uploaded, then any child uploading. Otherwise the folder's own status.
pub fn derived_status<'a>(
    folder: &UploadItem,
    children: impl IntoIterator<Item = &'a UploadItem>,
) -> ItemStatus {
    let statuses: Vec<ItemStatus> = children.into_iter().map(|child| child.status).collect();
    if statuses.is_empty() {
        return folder.status;
    }

    let any = |status: ItemStatus| statuses.iter().any(|s| *s == status);

    if any(ItemStatus::Cancelled) {
        ItemStatus::Cancelled
    } else if any(ItemStatus::Failed) {
        ItemStatus::Failed
    } else if statuses.iter().all(|s| *s == ItemStatus::Uploaded) {
        ItemStatus::Uploaded
    } else if any(ItemStatus::Uploading) {
        ItemStatus::Uploading
    } else {
        folder.status
    }
}

/// Mean of the children's progress, 0 for an empty folder.
pub fn derived_progress<'a>(children: impl IntoIterator<Item = &'a UploadItem>) -> f64 {
    let (sum, count) = children
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), child| (sum + child.progress, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Remote directory for an item: the browse path joined with the directory
/// part of its relative path. `("/docs", "Photos/2024/a.jpg")` gives
/// `/docs/Photos/2024`.
pub fn destination_path(base_path: &str, relative_path: Option<&str>) -> String {
    let mut segments: Vec<&str> = base_path.split('/').filter(|s| !s.is_empty()).collect();

    if let Some(relative_path) = relative_path {
        let mut parts: Vec<&str> = relative_path.split('/').filter(|s| !s.is_empty()).collect();
        parts.pop();
        segments.extend(parts);
    }

    format!("/{}", segments.join("/"))
}

/// Settled folder creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderOutcome {
    pub outcome: TransferOutcome,
    pub remote_id: Option<String>,
}

/// Issue the single "create folder" call for a folder item.
pub async fn create_remote_folder(
    api: &dyn RemoteApi,
    folder: &UploadItem,
    base_path: &str,
    cancel: &CancellationToken,
) -> FolderOutcome {
    let path = destination_path(base_path, folder.relative_path.as_deref());

    let result: Result<Option<String>> = if cancel.is_cancelled() {
        Err(UploadError::Aborted)
    } else {
        api.create_folder(folder.name(), &path, cancel).await
    };

    let outcome = TransferOutcome::classify(&result);
    match &outcome {
        TransferOutcome::Completed => info!(folder = folder.name(), path = %path, "Folder created"),
        TransferOutcome::Exists => info!(folder = folder.name(), path = %path, "Folder already exists, skipping"),
        TransferOutcome::Aborted => info!(folder = folder.name(), "Folder creation aborted"),
        TransferOutcome::Failed(message) => warn!(folder = folder.name(), error = %message, "Folder creation failed"),
    }

    FolderOutcome {
        outcome,
        remote_id: result.ok().flatten(),
    }
}
