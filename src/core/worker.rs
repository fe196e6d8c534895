use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use crate::config::UploadSettings;
use crate::uploaders::chunked::{ChunkedUploader, FileTransfer};
use crate::utils::progress::SpeedCalculator;
use super::errors::{Result, TransferOutcome, UploadError};
use super::folder::{self, destination_path};
use super::progress::{summarize, visible_rows};
use super::store::{StatusChange, UploadStore};
use super::traits::{RemoteApi, TransferObserver};
use super::types::{FileHandle, ItemId, ItemStatus, ManagerCommand, UploadEvent, UploadItem};

const SPEED_WINDOW: Duration = Duration::from_secs(5);

/// Reports from transfer tasks back to the coordinator
enum WorkerMessage {
    TotalChunks {
        id: ItemId,
        total: usize,
    },
    Progress {
        id: ItemId,
        progress: f64,
    },
    ChunksCompleted {
        id: ItemId,
        completed: usize,
    },
    Finished {
        id: ItemId,
        outcome: TransferOutcome,
        remote_id: Option<String>,
    },
}

/// Forwards engine callbacks into the coordinator loop.
struct ChannelObserver {
    id: ItemId,
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl TransferObserver for ChannelObserver {
    fn on_total_chunks(&self, total: usize) {
        let _ = self.tx.send(WorkerMessage::TotalChunks { id: self.id, total });
    }

    fn on_progress(&self, progress: f64) {
        let _ = self.tx.send(WorkerMessage::Progress { id: self.id, progress });
    }

    fn on_chunks_completed(&self, completed: usize) {
        let _ = self.tx.send(WorkerMessage::ChunksCompleted { id: self.id, completed });
    }
}

/// Coordinator settings fixed at spawn time.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub settings: UploadSettings,
    /// Remote directory uploads land in
    pub base_path: String,
    pub owner_id: i64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            settings: UploadSettings::default(),
            base_path: "/".to_string(),
            owner_id: 0,
        }
    }
}

/// Sole owner of the item store. Runs one item at a time.
pub(crate) struct UploadManagerWorker {
    store: UploadStore,
    api: Arc<dyn RemoteApi>,
    uploader: ChunkedUploader,
    settings: UploadSettings,
    base_path: String,
    owner_id: i64,
    speeds: HashMap<ItemId, SpeedCalculator>,

    event_tx: broadcast::Sender<UploadEvent>,
    message_tx: mpsc::UnboundedSender<WorkerMessage>,
    message_rx: mpsc::UnboundedReceiver<WorkerMessage>,
}

impl UploadManagerWorker {
    pub(crate) async fn run(
        api: Arc<dyn RemoteApi>,
        options: ManagerOptions,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        event_tx: broadcast::Sender<UploadEvent>,
    ) {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            store: UploadStore::new(),
            uploader: ChunkedUploader::new(api.clone()),
            api,
            settings: options.settings,
            base_path: options.base_path,
            owner_id: options.owner_id,
            speeds: HashMap::new(),
            event_tx,
            message_tx,
            message_rx,
        };

        loop {
            let current_before = worker.store.current();

            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => worker.handle_command(command),
                    None => break,
                },
                Some(message) = worker.message_rx.recv() => {
                    worker.handle_message(message);
                }
            }

            worker.drive();
            worker.publish_current(current_before);
        }

        worker.abort_active();
        debug!("Upload coordinator stopped");
    }

    /// Admit the current item if it has not started yet.
    fn drive(&mut self) {
        let Some(item) = self.store.current_item() else {
            return;
        };
        if item.status != ItemStatus::NotStarted {
            return;
        }

        let id = item.id;
        let Some(change) = self.store.set_status(id, ItemStatus::Uploading) else {
            return;
        };
        self.emit_status(change);

        let Some(item) = self.store.get(id).cloned() else {
            return;
        };

        if item.is_folder {
            info!(item = %id, folder = item.name(), "Creating folder");
            self.spawn_folder(item);
        } else {
            info!(item = %id, file = item.name(), size = item.size(), "Starting file upload");
            self.spawn_file(item);
        }
    }

    fn spawn_folder(&self, item: UploadItem) {
        let api = self.api.clone();
        let base_path = self.base_path.clone();
        let tx = self.message_tx.clone();

        tokio::spawn(async move {
            let result = folder::create_remote_folder(api.as_ref(), &item, &base_path, &item.cancellation).await;
            let _ = tx.send(WorkerMessage::Finished {
                id: item.id,
                outcome: result.outcome,
                remote_id: result.remote_id,
            });
        });
    }

    fn spawn_file(&self, item: UploadItem) {
        let transfer = FileTransfer {
            path: destination_path(&self.base_path, item.relative_path.as_deref()),
            file: item.file.clone(),
            owner_id: self.owner_id,
            settings: self.settings.clone(),
            // Children of a folder selection skip the pre-transfer lookup
            check_existing: item.parent_folder_id.is_none(),
        };
        let uploader = self.uploader.clone();
        let tx = self.message_tx.clone();

        tokio::spawn(async move {
            let observer = ChannelObserver {
                id: item.id,
                tx: tx.clone(),
            };
            let result = uploader.upload(&transfer, &observer, &item.cancellation).await;

            let outcome = TransferOutcome::classify(&result);
            let _ = tx.send(WorkerMessage::Finished {
                id: item.id,
                outcome,
                remote_id: result.ok().and_then(|receipt| receipt.remote_id),
            });
        });
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::EnqueueFiles { files, reply } => {
                let result = self.enqueue_files(files);
                let _ = reply.send(result);
            }
            ManagerCommand::EnqueueFolder { files, folder_name, reply } => {
                let result = self.enqueue_folder(files, &folder_name);
                let _ = reply.send(result);
            }
            ManagerCommand::RemoveFile { id, reply } => {
                let result = self.store.remove_file(id).map(|changes| {
                    changes.into_iter().for_each(|change| self.emit_status(change));
                });
                let _ = reply.send(result);
            }
            ManagerCommand::StartNextUpload { reply } => {
                // A running item keeps the pointer
                let current = match self.store.current_item() {
                    Some(item) if !item.status.is_terminal() => Some(item.id),
                    _ => self.store.start_next_upload(),
                };
                let _ = reply.send(current);
            }
            ManagerCommand::ClearAll { reply } => {
                let removed = self.store.clear_all();
                for id in &removed {
                    self.speeds.remove(id);
                }
                let count = removed.len();
                if count > 0 {
                    let _ = self.event_tx.send(UploadEvent::ItemsRemoved { ids: removed });
                }
                let _ = reply.send(count);
            }
            ManagerCommand::CancelUpload { reply } => {
                let removed = self.store.cancel_upload();
                self.speeds.clear();
                warn!(items = removed.len(), "Upload cancelled, collection cleared");
                if !removed.is_empty() {
                    let _ = self.event_tx.send(UploadEvent::ItemsRemoved { ids: removed });
                }
                let _ = reply.send(());
            }
            ManagerCommand::ToggleFolderCollapsed { id, reply } => {
                self.store.toggle_folder_collapsed(id);
                let _ = reply.send(());
            }
            ManagerCommand::ToggleCollapse { reply } => {
                self.store.toggle_collapse();
                let _ = reply.send(());
            }
            ManagerCommand::SetFileDialogOpen { open, reply } => {
                self.store.set_file_dialog_open(open);
                let _ = reply.send(());
            }
            ManagerCommand::SetFolderDialogOpen { open, reply } => {
                self.store.set_folder_dialog_open(open);
                let _ = reply.send(());
            }
            ManagerCommand::SetUploadOpen { open, reply } => {
                self.store.set_upload_open(open);
                let _ = reply.send(());
            }
            ManagerCommand::UpdateSettings { settings, reply } => {
                let result = settings.validate().map(|()| {
                    self.settings = settings;
                });
                let _ = reply.send(result);
            }
            ManagerCommand::SetBasePath { path, reply } => {
                self.base_path = path;
                let _ = reply.send(());
            }
            ManagerCommand::GetItem { id, reply } => {
                let _ = reply.send(self.store.get(id).cloned());
            }
            ManagerCommand::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
            ManagerCommand::Summary { reply } => {
                let _ = reply.send(summarize(self.store.items()));
            }
            ManagerCommand::Rows { reply } => {
                let _ = reply.send(visible_rows(self.store.items()));
            }
        }
    }

    fn enqueue_files(&mut self, files: Vec<FileHandle>) -> Result<Vec<ItemId>> {
        UploadStore::validate_selection(&files)?;

        let ids = self.store.enqueue_files(files);
        info!(count = ids.len(), "Files enqueued");
        let _ = self.event_tx.send(UploadEvent::ItemsAdded { ids: ids.clone() });

        Ok(ids)
    }

    fn enqueue_folder(&mut self, files: Vec<FileHandle>, folder_name: &str) -> Result<ItemId> {
        if folder_name.trim().is_empty() || folder_name.contains('/') {
            return Err(UploadError::InvalidInput(format!("Invalid folder name: {:?}", folder_name)));
        }
        if !files.is_empty() {
            UploadStore::validate_selection(&files)?;
        }

        let folder_id = self.store.enqueue_folder(files, folder_name);
        let mut ids = vec![folder_id];
        ids.extend(self.store.children(folder_id).map(|item| item.id));
        info!(folder = folder_name, files = ids.len() - 1, "Folder enqueued");
        let _ = self.event_tx.send(UploadEvent::ItemsAdded { ids });

        Ok(folder_id)
    }

    fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::TotalChunks { id, total } => {
                self.store.set_total_chunks(id, total);
            }
            WorkerMessage::ChunksCompleted { id, completed } => {
                self.store.set_chunks_completed(id, completed);
            }
            WorkerMessage::Progress { id, progress } => self.update_progress(id, progress),
            WorkerMessage::Finished { id, outcome, remote_id } => self.finish(id, outcome, remote_id),
        }
    }

    fn update_progress(&mut self, id: ItemId, progress: f64) {
        let Some(item) = self.store.get(id) else {
            return;
        };
        if item.status.is_terminal() {
            return;
        }

        let size = item.size();
        let transferred = (progress / 100.0 * size as f64) as u64;
        let speed = self
            .speeds
            .entry(id)
            .or_insert_with(|| {
                let mut speed = SpeedCalculator::new(SPEED_WINDOW);
                speed.add_data_point(0);
                speed
            });
        speed.add_data_point(transferred);
        let bytes_per_second = speed.calculate_speed();
        let eta = speed.estimate_eta(size.saturating_sub(transferred));

        self.store.set_progress(id, progress);
        self.store.set_speed(id, bytes_per_second, eta);

        if let Some(item) = self.store.get(id) {
            let _ = self.event_tx.send(UploadEvent::Progress {
                id,
                progress: item.progress,
                chunks_completed: item.chunks_completed,
                total_chunks: item.total_chunks,
            });
        }
    }

    fn finish(&mut self, id: ItemId, outcome: TransferOutcome, remote_id: Option<String>) {
        self.speeds.remove(&id);

        match &outcome {
            TransferOutcome::Completed => {
                self.store.set_progress(id, 100.0);
                info!(item = %id, "Upload completed");
            }
            TransferOutcome::Exists => info!(item = %id, "Already exists, skipped"),
            TransferOutcome::Aborted => info!(item = %id, "Upload aborted"),
            TransferOutcome::Failed(message) => {
                warn!(item = %id, error = %message, "Upload failed");
                self.store.set_error(id, message.clone());
            }
        }

        if let Some(remote_id) = remote_id {
            self.store.set_remote_id(id, remote_id);
        }
        if let Some(change) = self.store.set_status(id, outcome.status()) {
            self.emit_status(change);
        }

        // Late results of removed items never move the pointer
        if self.store.current() == Some(id) {
            self.store.start_next_upload();
        }
    }

    fn publish_current(&self, before: Option<ItemId>) {
        let current = self.store.current();
        if current == before {
            return;
        }

        let _ = self.event_tx.send(UploadEvent::CurrentChanged { id: current });
        if current.is_none() {
            debug!("No eligible item left");
            let _ = self.event_tx.send(UploadEvent::Idle);
        }
    }

    fn abort_active(&self) {
        for item in self.store.items() {
            if !item.status.is_terminal() {
                item.cancellation.cancel();
            }
        }
    }

    fn emit_status(&self, change: StatusChange) {
        let _ = self.event_tx.send(UploadEvent::StatusChanged {
            id: change.id,
            old_status: change.old_status,
            new_status: change.new_status,
        });
    }
}
