use std::collections::HashMap;
use std::time::Duration;
use chrono::Utc;
use tracing::{debug, info, warn};
use super::cancellation::{self, item_token};
use super::errors::{Result, UploadError};
use super::scheduler;
use super::types::{FileHandle, ItemId, ItemStatus, UiFlags, UploadItem, UploadSnapshot};

/// A status transition applied by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub id: ItemId,
    pub old_status: ItemStatus,
    pub new_status: ItemStatus,
}

/// Authoritative item collection: id map, enqueue order and the current item.
///
/// All mutation goes through the methods below. Point setters are no-ops for
/// unknown ids so that late transfer callbacks after a removal are harmless.
#[derive(Debug, Default)]
pub struct UploadStore {
    items: HashMap<ItemId, UploadItem>,
    order: Vec<ItemId>,
    current: Option<ItemId>,
    flags: UiFlags,
}

impl UploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&UploadItem> {
        self.items.get(&id)
    }

    pub fn current(&self) -> Option<ItemId> {
        self.current
    }

    pub fn current_item(&self) -> Option<&UploadItem> {
        self.current.and_then(|id| self.items.get(&id))
    }

    pub fn flags(&self) -> UiFlags {
        self.flags
    }

    /// Items in enqueue order.
    pub fn items(&self) -> impl Iterator<Item = &UploadItem> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    pub fn children(&self, folder_id: ItemId) -> impl Iterator<Item = &UploadItem> {
        self.items()
            .filter(move |item| item.parent_folder_id == Some(folder_id))
    }

    pub(crate) fn position(&self, id: ItemId) -> usize {
        self.order
            .iter()
            .position(|candidate| *candidate == id)
            .unwrap_or(usize::MAX)
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        UploadSnapshot {
            items: self.items().cloned().collect(),
            current: self.current,
            flags: self.flags,
        }
    }

    /// Reject selections that must never become items.
    pub fn validate_selection(files: &[FileHandle]) -> Result<()> {
        if files.is_empty() {
            return Err(UploadError::InvalidInput("Empty selection".to_string()));
        }

        match files.iter().find(|file| file.size() == 0) {
            Some(file) => Err(UploadError::EmptyFile(file.name().to_string())),
            None => Ok(()),
        }
    }

    fn current_is_active(&self) -> bool {
        self.current_item()
            .is_some_and(|item| !item.status.is_terminal())
    }

    /// Add top-level files. The first new item becomes current when nothing
    /// active is selected.
    pub fn enqueue_files(&mut self, files: Vec<FileHandle>) -> Vec<ItemId> {
        let ids: Vec<ItemId> = files
            .into_iter()
            .map(|file| self.insert(UploadItem::new_file(file, item_token(None))))
            .collect();

        if !self.current_is_active() {
            self.current = ids.first().copied();
        }

        ids
    }

    /// Add a folder item plus one child per file. Returns the folder id.
    pub fn enqueue_folder(&mut self, files: Vec<FileHandle>, folder_name: &str) -> ItemId {
        let folder = UploadItem::new_folder(folder_name);
        let folder_id = folder.id;
        let folder_token = folder.cancellation.clone();
        self.insert(folder);

        for file in files {
            let mut child = UploadItem::new_file(file, item_token(Some(&folder_token)));
            child.parent_folder_id = Some(folder_id);
            if child.relative_path.is_none() {
                child.relative_path = Some(format!("{}/{}", folder_name, child.name()));
            }
            self.insert(child);
        }

        if !self.current_is_active() {
            self.current = Some(folder_id);
        }

        folder_id
    }

    fn insert(&mut self, item: UploadItem) -> ItemId {
        let id = item.id;
        self.order.push(id);
        self.items.insert(id, item);
        id
    }

    /// Apply a status transition. Terminal items never change.
    pub fn set_status(&mut self, id: ItemId, status: ItemStatus) -> Option<StatusChange> {
        let item = self.items.get_mut(&id)?;
        let old_status = item.status;

        if !ItemStatus::is_valid_transition(old_status, status) {
            if old_status != status {
                debug!(item = %id, from = ?old_status, to = ?status, "Ignored status transition");
            }
            return None;
        }

        item.status = status;
        match status {
            ItemStatus::Uploading => item.started_at = Some(Utc::now()),
            _ if status.is_terminal() => {
                item.completed_at = Some(Utc::now());
                item.speed = 0.0;
                item.eta = None;
            }
            _ => {}
        }

        Some(StatusChange {
            id,
            old_status,
            new_status: status,
        })
    }

    pub fn set_progress(&mut self, id: ItemId, progress: f64) {
        if let Some(item) = self.items.get_mut(&id) {
            if !item.status.is_terminal() {
                item.progress = progress.clamp(0.0, 100.0);
            }
        }
    }

    pub fn set_chunks_completed(&mut self, id: ItemId, completed: usize) {
        if let Some(item) = self.items.get_mut(&id) {
            item.chunks_completed = completed;
        }
    }

    pub fn set_total_chunks(&mut self, id: ItemId, total: usize) {
        if let Some(item) = self.items.get_mut(&id) {
            item.total_chunks = total;
        }
    }

    pub fn set_error(&mut self, id: ItemId, error: impl Into<String>) {
        if let Some(item) = self.items.get_mut(&id) {
            if !item.status.is_terminal() {
                item.error = Some(error.into());
            }
        }
    }

    pub fn set_speed(&mut self, id: ItemId, speed: f64, eta: Option<Duration>) {
        if let Some(item) = self.items.get_mut(&id) {
            if !item.status.is_terminal() {
                item.speed = speed;
                item.eta = eta;
            }
        }
    }

    pub fn set_remote_id(&mut self, id: ItemId, remote_id: impl Into<String>) {
        if let Some(item) = self.items.get_mut(&id) {
            item.remote_id = Some(remote_id.into());
        }
    }

    /// Cancel an item, and for folders every non-terminal descendant. The item
    /// stays in the collection. If the current item ended up terminal the
    /// scheduler picks the next eligible one.
    pub fn remove_file(&mut self, id: ItemId) -> Result<Vec<StatusChange>> {
        let item = self.items.get(&id).ok_or(UploadError::ItemNotFound(id))?;
        if item.status != ItemStatus::Cancelled {
            cancellation::abort(&item.cancellation);
        }

        let changes = cancellation::cancel_subtree(self, id);
        info!(item = %id, cancelled = changes.len(), "Item removed");

        if self.is_empty() {
            self.reset();
        } else if self.current == Some(id) || !self.current_is_active() {
            self.start_next_upload();
        }

        Ok(changes)
    }

    /// Point `current` at the first eligible item, or clear it.
    pub fn start_next_upload(&mut self) -> Option<ItemId> {
        self.current = scheduler::next_eligible(self);
        self.current
    }

    /// Drop every terminal item. Returns the removed ids.
    pub fn clear_all(&mut self) -> Vec<ItemId> {
        let removed: Vec<ItemId> = self
            .items()
            .filter(|item| item.status.is_terminal())
            .map(|item| item.id)
            .collect();

        for id in &removed {
            self.items.remove(id);
        }
        self.order.retain(|id| self.items.contains_key(id));

        if self.is_empty() {
            self.reset();
        } else if self.current.is_some_and(|id| !self.items.contains_key(&id)) {
            self.current = None;
        }

        removed
    }

    /// Abort the current transfer and empty the collection. Returns the
    /// removed ids.
    pub fn cancel_upload(&mut self) -> Vec<ItemId> {
        if let Some(item) = self.current_item() {
            cancellation::abort(&item.cancellation);
        }

        // Nothing may keep running once its item is gone
        for item in self.items.values() {
            if !item.status.is_terminal() && cancellation::abort(&item.cancellation) {
                warn!(item = %item.id, "Aborted with collection reset");
            }
        }

        let removed = std::mem::take(&mut self.order);
        self.items.clear();
        self.reset();

        removed
    }

    fn reset(&mut self) {
        self.current = None;
        self.flags = UiFlags::default();
    }

    pub fn toggle_folder_collapsed(&mut self, id: ItemId) {
        if let Some(item) = self.items.get_mut(&id) {
            if item.is_folder {
                item.collapsed = !item.collapsed;
            }
        }
    }

    pub fn toggle_collapse(&mut self) {
        self.flags.collapse = !self.flags.collapse;
    }

    pub fn set_file_dialog_open(&mut self, open: bool) {
        self.flags.file_dialog_open = open;
    }

    pub fn set_folder_dialog_open(&mut self, open: bool) {
        self.flags.folder_dialog_open = open;
    }

    pub fn set_upload_open(&mut self, open: bool) {
        self.flags.upload_open = open;
    }
}
