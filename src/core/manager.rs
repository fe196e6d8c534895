use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use crate::config::{Config, UploadSettings};
use super::errors::{Result, UploadError};
use super::progress::{DisplayRow, UploadSummary};
use super::traits::RemoteApi;
use super::types::{FileHandle, ItemId, ManagerCommand, UploadEvent, UploadItem, UploadSnapshot};
use super::worker::{ManagerOptions, UploadManagerWorker};

/// Async handle to the upload coordinator. Cheap to clone; the coordinator
/// stops once every clone is dropped.
#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
}

/// Manager plus the coordinator task
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// Drop this handle's manager and wait for the coordinator to exit. Other
    /// clones keep it alive.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.manager);
        self.worker_handle
            .await
            .map_err(|err| UploadError::internal(format!("Worker panic: {}", err)))
    }
}

impl ManagerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            settings: config.upload.clone(),
            base_path: config.base_path.clone(),
            owner_id: config.owner_id,
        }
    }
}

impl UploadManager {
    pub fn new(api: Arc<dyn RemoteApi>, options: ManagerOptions) -> UploadManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        // Slow subscribers lag past this many events
        let (event_tx, _) = broadcast::channel(1024);

        let worker_handle = tokio::spawn(UploadManagerWorker::run(
            api,
            options,
            command_rx,
            event_tx.clone(),
        ));

        let manager = Self {
            command_tx,
            event_tx,
        };

        UploadManagerHandle {
            manager,
            worker_handle,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| UploadError::ManagerShutdown)?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }

    /// Add top-level files. Zero-length files reject the whole selection.
    pub async fn enqueue_files(&self, files: Vec<FileHandle>) -> Result<Vec<ItemId>> {
        self.request(|reply| ManagerCommand::EnqueueFiles { files, reply })
            .await?
    }

    /// Add a folder and its files; returns the folder's id.
    pub async fn enqueue_folder(&self, files: Vec<FileHandle>, folder_name: impl Into<String>) -> Result<ItemId> {
        let folder_name = folder_name.into();
        self.request(|reply| ManagerCommand::EnqueueFolder { files, folder_name, reply })
            .await?
    }

    /// Cancel an item (and a folder's pending children). The item stays listed
    /// as cancelled.
    pub async fn remove_file(&self, id: ItemId) -> Result<()> {
        self.request(|reply| ManagerCommand::RemoveFile { id, reply })
            .await?
    }

    pub async fn start_next_upload(&self) -> Result<Option<ItemId>> {
        self.request(|reply| ManagerCommand::StartNextUpload { reply }).await
    }

    /// Drop finished items; returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::ClearAll { reply }).await
    }

    /// Abort the active transfer and empty the collection.
    pub async fn cancel_upload(&self) -> Result<()> {
        self.request(|reply| ManagerCommand::CancelUpload { reply }).await
    }

    pub async fn toggle_folder_collapsed(&self, id: ItemId) -> Result<()> {
        self.request(|reply| ManagerCommand::ToggleFolderCollapsed { id, reply }).await
    }

    pub async fn toggle_collapse(&self) -> Result<()> {
        self.request(|reply| ManagerCommand::ToggleCollapse { reply }).await
    }

    pub async fn set_file_dialog_open(&self, open: bool) -> Result<()> {
        self.request(|reply| ManagerCommand::SetFileDialogOpen { open, reply }).await
    }

    pub async fn set_folder_dialog_open(&self, open: bool) -> Result<()> {
        self.request(|reply| ManagerCommand::SetFolderDialogOpen { open, reply }).await
    }

    pub async fn set_upload_open(&self, open: bool) -> Result<()> {
        self.request(|reply| ManagerCommand::SetUploadOpen { open, reply }).await
    }

    /// Takes effect for transfers admitted after this call.
    pub async fn update_settings(&self, settings: UploadSettings) -> Result<()> {
        self.request(|reply| ManagerCommand::UpdateSettings { settings, reply })
            .await?
    }

    pub async fn set_base_path(&self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        self.request(|reply| ManagerCommand::SetBasePath { path, reply }).await
    }

    pub async fn item(&self, id: ItemId) -> Result<Option<UploadItem>> {
        self.request(|reply| ManagerCommand::GetItem { id, reply }).await
    }

    pub async fn snapshot(&self) -> Result<UploadSnapshot> {
        self.request(|reply| ManagerCommand::Snapshot { reply }).await
    }

    pub async fn summary(&self) -> Result<UploadSummary> {
        self.request(|reply| ManagerCommand::Summary { reply }).await
    }

    pub async fn rows(&self) -> Result<Vec<DisplayRow>> {
        self.request(|reply| ManagerCommand::Rows { reply }).await
    }

    /// Subscribe to coordinator events.
    ///
    /// A receiver that falls behind by more than the channel capacity gets a
    /// `Lagged` error and skips ahead.
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&UploadEvent) -> bool,
    {
        FilteredEventReceiver {
            receiver: self.event_tx.subscribe(),
            filter,
        }
    }

    /// Resolve once no item is current.
    pub async fn wait_until_idle(&self) -> Result<()> {
        let mut events = self.subscribe_events();
        if self.snapshot().await?.current.is_none() {
            return Ok(());
        }

        loop {
            match events.recv().await {
                Ok(UploadEvent::Idle) => return Ok(()),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    if self.snapshot().await?.current.is_none() {
                        return Ok(());
                    }
                }
                Err(RecvError::Closed) => return Err(UploadError::ManagerShutdown),
            }
        }
    }
}

/// Event receiver that only yields matching events
pub struct FilteredEventReceiver<F> {
    receiver: broadcast::Receiver<UploadEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&UploadEvent) -> bool,
{
    pub async fn recv(&mut self) -> Result<UploadEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}
