use std::path::Path;
use std::time::Duration;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::config::UploadSettings;
use super::errors::{Result, UploadError};
use super::progress::{DisplayRow, UploadSummary};

/// Upload item identifier, stable for the item's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ItemStatus {
    /// Waiting for the scheduler
    NotStarted,
    /// Selected as current, transfer in flight
    Uploading,
    Uploaded,
    Cancelled,
    Failed,
    /// The remote already had it
    Skipped,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Uploaded | Self::Cancelled | Self::Failed | Self::Skipped)
    }

    /// Terminal states that unblock children.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Uploaded | Self::Skipped)
    }

    pub fn is_valid_transition(from: Self, to: Self) -> bool {
        match (from, to) {
            (Self::NotStarted, Self::Uploading) => true,
            (Self::NotStarted, Self::Cancelled) => true,
            (Self::Uploading, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Pending",
            Self::Uploading => "Uploading",
            Self::Uploaded => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        }
    }
}

/// Payload handed over by the selection layer. The bytes are reference counted,
/// so clones share the same buffer.
#[derive(Debug, Clone)]
pub struct FileHandle {
    name: String,
    bytes: Bytes,
    relative_path: Option<String>,
}

impl FileHandle {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            relative_path: None,
        }
    }

    /// Zero-byte placeholder carried by folder items.
    pub fn folder(name: impl Into<String>) -> Self {
        Self::new(name, Bytes::new())
    }

    /// Attach a picker-style relative path such as `Photos/2024/a.jpg`.
    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| UploadError::InvalidInput(format!("Invalid file name: {}", path.display())))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;

        Ok(Self::new(name, bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn relative_path(&self) -> Option<&str> {
        self.relative_path.as_deref()
    }
}

/// The unit of orchestration.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: ItemId,
    pub file: FileHandle,
    pub is_folder: bool,
    pub status: ItemStatus,
    /// Percentage in [0, 100]; folders derive theirs from children
    pub progress: f64,
    pub chunks_completed: usize,
    pub total_chunks: usize,
    pub parent_folder_id: Option<ItemId>,
    pub relative_path: Option<String>,
    pub cancellation: CancellationToken,
    pub error: Option<String>,
    /// Display only
    pub collapsed: bool,
    /// Id assigned by the remote, when it reports one
    pub remote_id: Option<String>,
    /// Bytes per second
    pub speed: f64,
    pub eta: Option<Duration>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadItem {
    pub fn new_file(file: FileHandle, cancellation: CancellationToken) -> Self {
        Self {
            id: ItemId::new(),
            relative_path: file.relative_path().map(String::from),
            file,
            is_folder: false,
            status: ItemStatus::NotStarted,
            progress: 0.0,
            chunks_completed: 0,
            total_chunks: 0,
            parent_folder_id: None,
            cancellation,
            error: None,
            collapsed: false,
            remote_id: None,
            speed: 0.0,
            eta: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn new_folder(name: &str) -> Self {
        Self {
            is_folder: true,
            ..Self::new_file(FileHandle::folder(name), CancellationToken::new())
        }
    }

    pub fn name(&self) -> &str {
        self.file.name()
    }

    pub fn size(&self) -> u64 {
        self.file.size()
    }
}

/// Transient display flags owned by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiFlags {
    pub collapse: bool,
    pub file_dialog_open: bool,
    pub folder_dialog_open: bool,
    pub upload_open: bool,
}

/// Point-in-time copy of the collection, in enqueue order.
#[derive(Debug, Clone, Default)]
pub struct UploadSnapshot {
    pub items: Vec<UploadItem>,
    pub current: Option<ItemId>,
    pub flags: UiFlags,
}

impl UploadSnapshot {
    pub fn get(&self, id: ItemId) -> Option<&UploadItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn children_of(&self, folder_id: ItemId) -> impl Iterator<Item = &UploadItem> {
        self.items
            .iter()
            .filter(move |item| item.parent_folder_id == Some(folder_id))
    }
}

/// One entry of a file's part manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRecord {
    pub name: String,
    pub part_id: i64,
    #[serde(rename = "partNo")]
    pub part_number: u32,
    pub size: u64,
    pub channel_id: i64,
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

/// Finalize payload registering a fully stored file with the remote index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRegistration {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub size: u64,
    pub owner_id: i64,
    pub parts: Vec<PartRecord>,
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// New items were enqueued
    ItemsAdded {
        ids: Vec<ItemId>,
    },

    StatusChanged {
        id: ItemId,
        old_status: ItemStatus,
        new_status: ItemStatus,
    },

    Progress {
        id: ItemId,
        progress: f64,
        chunks_completed: usize,
        total_chunks: usize,
    },

    CurrentChanged {
        id: Option<ItemId>,
    },

    ItemsRemoved {
        ids: Vec<ItemId>,
    },

    /// No item is current any more
    Idle,
}

/// Actions accepted by the coordinator
pub enum ManagerCommand {
    EnqueueFiles {
        files: Vec<FileHandle>,
        reply: oneshot::Sender<Result<Vec<ItemId>>>,
    },

    EnqueueFolder {
        files: Vec<FileHandle>,
        folder_name: String,
        reply: oneshot::Sender<Result<ItemId>>,
    },

    RemoveFile {
        id: ItemId,
        reply: oneshot::Sender<Result<()>>,
    },

    StartNextUpload {
        reply: oneshot::Sender<Option<ItemId>>,
    },

    ClearAll {
        reply: oneshot::Sender<usize>,
    },

    CancelUpload {
        reply: oneshot::Sender<()>,
    },

    ToggleFolderCollapsed {
        id: ItemId,
        reply: oneshot::Sender<()>,
    },

    ToggleCollapse {
        reply: oneshot::Sender<()>,
    },

    SetFileDialogOpen {
        open: bool,
        reply: oneshot::Sender<()>,
    },

    SetFolderDialogOpen {
        open: bool,
        reply: oneshot::Sender<()>,
    },

    SetUploadOpen {
        open: bool,
        reply: oneshot::Sender<()>,
    },

    UpdateSettings {
        settings: UploadSettings,
        reply: oneshot::Sender<Result<()>>,
    },

    SetBasePath {
        path: String,
        reply: oneshot::Sender<()>,
    },

    GetItem {
        id: ItemId,
        reply: oneshot::Sender<Option<UploadItem>>,
    },

    Snapshot {
        reply: oneshot::Sender<UploadSnapshot>,
    },

    Summary {
        reply: oneshot::Sender<UploadSummary>,
    },

    Rows {
        reply: oneshot::Sender<Vec<DisplayRow>>,
    },
}

// Everything crossing the coordinator boundary must be Send
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<UploadItem>();
        assert_send::<UploadEvent>();
        assert_send::<ManagerCommand>();
    }
};
