//! Aggregate metrics and display rows derived from the item collection.
//!
//! Nothing here is stored: every value is recomputed from the items handed in.

use std::collections::HashSet;
use std::time::Duration;
use super::folder::{derived_progress, derived_status};
use super::types::{ItemId, ItemStatus, UploadItem};

/// Totals shown in the upload panel header.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UploadSummary {
    /// Valid top-level folders
    pub folders: usize,
    /// Valid top-level files
    pub files: usize,
    pub total_size: u64,
    pub uploaded_size: f64,
    /// Byte-weighted percentage over all valid items
    pub total_progress: f64,
}

fn counts_toward_progress(status: ItemStatus) -> bool {
    !matches!(status, ItemStatus::Cancelled | ItemStatus::Failed | ItemStatus::Skipped)
}

/// Cancelled, failed and skipped items are left out; uploaded items count as
/// fully transferred.
pub fn summarize<'a>(items: impl IntoIterator<Item = &'a UploadItem>) -> UploadSummary {
    let items: Vec<&UploadItem> = items.into_iter().collect();
    let present: HashSet<ItemId> = items.iter().map(|item| item.id).collect();

    let mut summary = UploadSummary::default();
    for item in items.iter().filter(|item| counts_toward_progress(item.status)) {
        let top_level = item
            .parent_folder_id
            .is_none_or(|parent| !present.contains(&parent));
        if top_level {
            if item.is_folder {
                summary.folders += 1;
            } else {
                summary.files += 1;
            }
        }

        let progress = if item.status == ItemStatus::Uploaded { 100.0 } else { item.progress };
        summary.total_size += item.size();
        summary.uploaded_size += progress / 100.0 * item.size() as f64;
    }

    if summary.total_size > 0 {
        summary.total_progress = summary.uploaded_size / summary.total_size as f64 * 100.0;
    }

    summary
}

/// Stable display label for a status and progress.
pub fn status_label(status: ItemStatus, progress: f64) -> String {
    match status {
        ItemStatus::Uploading => format!("Uploading {}%", progress.round() as u32),
        other => other.label().to_string(),
    }
}

/// One line of the upload list.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRow {
    pub id: ItemId,
    pub name: String,
    /// 0 for top-level items, 1 for folder children
    pub depth: usize,
    pub is_folder: bool,
    pub status: ItemStatus,
    pub progress: f64,
    pub label: String,
    pub size: u64,
    pub child_count: usize,
    pub speed: f64,
    pub eta: Option<Duration>,
    pub error: Option<String>,
}

impl DisplayRow {
    fn new(item: &UploadItem, depth: usize, status: ItemStatus, progress: f64, child_count: usize) -> Self {
        Self {
            id: item.id,
            name: item.name().to_string(),
            depth,
            is_folder: item.is_folder,
            status,
            progress,
            label: status_label(status, progress),
            size: item.size(),
            child_count,
            speed: item.speed,
            eta: item.eta,
            error: item.error.clone(),
        }
    }
}

/// Top-level items in enqueue order, each expanded folder followed by its
/// children sorted by name. Folders show their derived status and progress.
pub fn visible_rows<'a>(items: impl IntoIterator<Item = &'a UploadItem>) -> Vec<DisplayRow> {
    let items: Vec<&UploadItem> = items.into_iter().collect();
    let present: HashSet<ItemId> = items.iter().map(|item| item.id).collect();
    let mut rows = Vec::new();

    for item in &items {
        if item.parent_folder_id.is_some_and(|parent| present.contains(&parent)) {
            continue;
        }

        if !item.is_folder {
            rows.push(DisplayRow::new(item, 0, item.status, item.progress, 0));
            continue;
        }

        let mut children: Vec<&UploadItem> = items
            .iter()
            .copied()
            .filter(|child| child.parent_folder_id == Some(item.id))
            .collect();
        children.sort_by(|a, b| a.name().cmp(b.name()));

        let status = derived_status(item, children.iter().copied());
        let progress = derived_progress(children.iter().copied());
        rows.push(DisplayRow::new(item, 0, status, progress, children.len()));

        if !item.collapsed {
            rows.extend(
                children
                    .iter()
                    .map(|child| DisplayRow::new(child, 1, child.status, child.progress, 0)),
            );
        }
    }

    rows
}
