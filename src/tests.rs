use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;
use crate::config::UploadSettings;
use crate::core::*;
use crate::uploaders::chunked::upload_session_id;
use crate::uploaders::{Fault, MemoryRemote};

const WAIT: Duration = Duration::from_secs(10);

fn settings(split_file_size: u64, concurrency: usize) -> UploadSettings {
    UploadSettings {
        split_file_size,
        concurrency,
        ..UploadSettings::default()
    }
}

fn start(remote: &Arc<MemoryRemote>, settings: UploadSettings) -> UploadManagerHandle {
    UploadManager::new(
        remote.clone(),
        ManagerOptions {
            settings,
            ..ManagerOptions::default()
        },
    )
}

fn file(name: &str, size: usize) -> FileHandle {
    FileHandle::new(name, vec![1u8; size])
}

fn child(folder: &str, name: &str, size: usize) -> FileHandle {
    file(name, size).with_relative_path(format!("{}/{}", folder, name))
}

async fn wait_idle(manager: &UploadManager) {
    timeout(WAIT, manager.wait_until_idle())
        .await
        .expect("manager never went idle")
        .unwrap();
}

async fn wait_for_status(events: &mut broadcast::Receiver<UploadEvent>, id: ItemId, status: ItemStatus) {
    timeout(WAIT, async {
        loop {
            if let Ok(UploadEvent::StatusChanged { id: got, new_status, .. }) = events.recv().await {
                if got == id && new_status == status {
                    return;
                }
            }
        }
    })
    .await
    .expect("status never reached");
}

fn drain(events: &mut broadcast::Receiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn status_changes(events: &[UploadEvent]) -> Vec<(ItemId, ItemStatus)> {
    events
        .iter()
        .filter_map(|event| match event {
            UploadEvent::StatusChanged { id, new_status, .. } => Some((*id, *new_status)),
            _ => None,
        })
        .collect()
}

/// No two items are ever uploading at once.
fn assert_serial_admission(events: &[UploadEvent]) {
    let mut uploading = HashSet::new();
    for (id, status) in status_changes(events) {
        if status == ItemStatus::Uploading {
            uploading.insert(id);
            assert!(uploading.len() <= 1, "two items uploading at once");
        } else {
            uploading.remove(&id);
        }
    }
}

/// No child starts before its folder reached a success-like state.
fn assert_parent_first(events: &[UploadEvent], folder: ItemId, children: &[ItemId]) {
    let mut statuses: HashMap<ItemId, ItemStatus> = HashMap::new();
    for (id, status) in status_changes(events) {
        if status == ItemStatus::Uploading && children.contains(&id) {
            let folder_status = statuses.get(&folder).copied();
            assert!(
                folder_status.is_some_and(ItemStatus::is_success),
                "child started while folder was {:?}",
                folder_status
            );
        }
        statuses.insert(id, status);
    }
}

#[tokio::test]
async fn test_single_file_in_three_parts() {
    const MIB: usize = 1024 * 1024;
    let remote = Arc::new(MemoryRemote::new());
    let handle = start(&remote, settings(10 * MIB as u64, 2));
    let manager = &handle.manager;
    let mut events = manager.subscribe_events();

    let ids = manager.enqueue_files(vec![file("video.mp4", 30 * MIB)]).await.unwrap();
    wait_idle(manager).await;

    let item = manager.item(ids[0]).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Uploaded);
    assert_eq!(item.total_chunks, 3);
    assert_eq!(item.chunks_completed, 3);
    assert_eq!(item.progress, 100.0);
    assert!(item.remote_id.is_some());
    assert!(item.completed_at.is_some());

    let progress: Vec<f64> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            UploadEvent::Progress { id, progress, .. } if id == ids[0] => Some(progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 3);
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(progress.last().copied(), Some(100.0));

    let registered = remote.file("/", "video.mp4").await.unwrap();
    assert_eq!(registered.parts.len(), 3);
    assert!(remote.peak_concurrent_parts() <= 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_existing_folder_is_skipped_and_children_proceed() {
    let remote = Arc::new(MemoryRemote::new().with_folder_fault("docs", Fault::AlreadyExists));
    let handle = start(&remote, settings(4, 2));
    let manager = &handle.manager;
    let mut events = manager.subscribe_events();

    let folder = manager
        .enqueue_folder(vec![child("docs", "a.txt", 10), child("docs", "b.txt", 6)], "docs")
        .await
        .unwrap();
    wait_idle(manager).await;

    let snapshot = manager.snapshot().await.unwrap();
    assert_eq!(snapshot.get(folder).unwrap().status, ItemStatus::Skipped);
    let children: Vec<ItemId> = snapshot.children_of(folder).map(|item| item.id).collect();
    assert_eq!(children.len(), 2);
    assert!(snapshot
        .children_of(folder)
        .all(|item| item.status == ItemStatus::Uploaded));

    assert!(remote.file("/docs", "a.txt").await.is_some());
    assert!(remote.file("/docs", "b.txt").await.is_some());

    let log = drain(&mut events);
    assert_parent_first(&log, folder, &children);
    assert_serial_admission(&log);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_pending_sibling_while_first_uploads() {
    let remote = Arc::new(MemoryRemote::new().with_part_delay(Duration::from_millis(100)));
    let handle = start(&remote, settings(8, 1));
    let manager = &handle.manager;
    let mut events = manager.subscribe_events();
    let mut watcher = manager.subscribe_events();

    let ids = manager
        .enqueue_files(vec![file("one", 16), file("two", 16), file("three", 16)])
        .await
        .unwrap();

    wait_for_status(&mut watcher, ids[0], ItemStatus::Uploading).await;
    manager.remove_file(ids[1]).await.unwrap();

    let second = manager.item(ids[1]).await.unwrap().unwrap();
    assert_eq!(second.status, ItemStatus::Cancelled);
    assert!(second.cancellation.is_cancelled());
    assert_eq!(manager.snapshot().await.unwrap().current, Some(ids[0]));

    wait_idle(manager).await;

    let snapshot = manager.snapshot().await.unwrap();
    assert_eq!(snapshot.get(ids[0]).unwrap().status, ItemStatus::Uploaded);
    assert_eq!(snapshot.get(ids[1]).unwrap().status, ItemStatus::Cancelled);
    assert_eq!(snapshot.get(ids[2]).unwrap().status, ItemStatus::Uploaded);

    let log = drain(&mut events);
    assert_serial_admission(&log);
    let changes = status_changes(&log);
    let first_done = changes
        .iter()
        .position(|change| *change == (ids[0], ItemStatus::Uploaded))
        .unwrap();
    let third_started = changes
        .iter()
        .position(|change| *change == (ids[2], ItemStatus::Uploading))
        .unwrap();
    assert!(first_done < third_started);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_folder_blocks_children() {
    let remote = Arc::new(MemoryRemote::new().with_folder_fault("docs", Fault::Error("boom".into())));
    let handle = start(&remote, settings(4, 2));
    let manager = &handle.manager;

    let folder = manager
        .enqueue_folder(vec![child("docs", "a.txt", 10), child("docs", "b.txt", 6)], "docs")
        .await
        .unwrap();
    let loose = manager.enqueue_files(vec![file("loose.txt", 5)]).await.unwrap();
    wait_idle(manager).await;

    let snapshot = manager.snapshot().await.unwrap();
    let folder_item = snapshot.get(folder).unwrap();
    assert_eq!(folder_item.status, ItemStatus::Failed);
    assert_eq!(
        folder_item.error.as_deref(),
        Some("Server error: status code 500, message: boom")
    );
    assert!(snapshot
        .children_of(folder)
        .all(|item| item.status == ItemStatus::NotStarted));
    assert_eq!(snapshot.get(loose[0]).unwrap().status, ItemStatus::Uploaded);
    assert_eq!(snapshot.current, None);

    // Re-running the scheduler never picks the orphans
    assert_eq!(manager.start_next_upload().await.unwrap(), None);
    assert_eq!(remote.file_count().await, 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_folder_keeps_uploaded_children() {
    let remote = Arc::new(MemoryRemote::new().with_part_delay(Duration::from_millis(80)));
    let handle = start(&remote, settings(8, 1));
    let manager = &handle.manager;
    let mut watcher = manager.subscribe_events();

    let folder = manager
        .enqueue_folder(
            vec![child("f", "a", 8), child("f", "b", 16), child("f", "c", 16)],
            "f",
        )
        .await
        .unwrap();
    let children: Vec<ItemId> = manager
        .snapshot()
        .await
        .unwrap()
        .children_of(folder)
        .map(|item| item.id)
        .collect();

    wait_for_status(&mut watcher, children[0], ItemStatus::Uploaded).await;
    manager.remove_file(folder).await.unwrap();
    wait_idle(manager).await;

    let snapshot = manager.snapshot().await.unwrap();
    assert_eq!(snapshot.get(folder).unwrap().status, ItemStatus::Uploaded);
    assert_eq!(snapshot.get(children[0]).unwrap().status, ItemStatus::Uploaded);
    assert_eq!(snapshot.get(children[1]).unwrap().status, ItemStatus::Cancelled);
    assert_eq!(snapshot.get(children[2]).unwrap().status, ItemStatus::Cancelled);

    let rows = manager.rows().await.unwrap();
    assert_eq!(rows[0].id, folder);
    assert_eq!(rows[0].status, ItemStatus::Cancelled);
    assert_eq!(rows[0].label, "Cancelled");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_pending_folder_cascades() {
    let remote = Arc::new(MemoryRemote::new().with_part_delay(Duration::from_millis(100)));
    let handle = start(&remote, settings(8, 1));
    let manager = &handle.manager;
    let mut watcher = manager.subscribe_events();

    let blocker = manager.enqueue_files(vec![file("big", 16)]).await.unwrap();
    let folder = manager
        .enqueue_folder(vec![child("f", "a", 4), child("f", "b", 4)], "f")
        .await
        .unwrap();
    wait_for_status(&mut watcher, blocker[0], ItemStatus::Uploading).await;

    manager.remove_file(folder).await.unwrap();

    let snapshot = manager.snapshot().await.unwrap();
    assert_eq!(snapshot.get(folder).unwrap().status, ItemStatus::Cancelled);
    assert!(snapshot
        .children_of(folder)
        .all(|item| item.status == ItemStatus::Cancelled && item.cancellation.is_cancelled()));

    wait_idle(manager).await;
    assert!(remote.folders().await.is_empty());
    assert_eq!(
        manager.item(blocker[0]).await.unwrap().unwrap().status,
        ItemStatus::Uploaded
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_terminal_items_are_immutable() {
    let remote = Arc::new(MemoryRemote::new());
    let handle = start(&remote, settings(4, 2));
    let manager = &handle.manager;

    let ids = manager.enqueue_files(vec![file("a", 4)]).await.unwrap();
    wait_idle(manager).await;

    manager.remove_file(ids[0]).await.unwrap();
    manager.start_next_upload().await.unwrap();

    let item = manager.item(ids[0]).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Uploaded);

    assert_eq!(manager.clear_all().await.unwrap(), 1);
    assert!(manager.item(ids[0]).await.unwrap().is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicates_are_skipped() {
    let remote = Arc::new(
        MemoryRemote::new()
            .with_existing_file("/", "seen.txt")
            .with_register_fault("late.txt", Fault::AlreadyExists),
    );
    let handle = start(&remote, settings(4, 2));
    let manager = &handle.manager;

    let ids = manager
        .enqueue_files(vec![file("seen.txt", 4), file("late.txt", 4), file("new.txt", 4)])
        .await
        .unwrap();
    wait_idle(manager).await;

    let snapshot = manager.snapshot().await.unwrap();
    assert_eq!(snapshot.get(ids[0]).unwrap().status, ItemStatus::Skipped);
    assert_eq!(snapshot.get(ids[1]).unwrap().status, ItemStatus::Skipped);
    assert_eq!(snapshot.get(ids[2]).unwrap().status, ItemStatus::Uploaded);
    assert!(snapshot.items.iter().all(|item| item.error.is_none()));

    // The lookup short-circuits before any part is sent
    let seen_parts = remote.stored_parts(&upload_session_id("seen.txt", "/", 4, 0)).await;
    assert!(seen_parts.is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_part_keeps_scheduler_going() {
    let remote = Arc::new(MemoryRemote::new().with_part_fault(2, Fault::Error("disk full".into())));
    let handle = start(&remote, settings(4, 1));
    let manager = &handle.manager;

    let ids = manager
        .enqueue_files(vec![file("big", 12), file("small", 3)])
        .await
        .unwrap();
    wait_idle(manager).await;

    let failed = manager.item(ids[0]).await.unwrap().unwrap();
    assert_eq!(failed.status, ItemStatus::Failed);
    assert!(failed.error.unwrap().contains("disk full"));
    assert_eq!(
        manager.item(ids[1]).await.unwrap().unwrap().status,
        ItemStatus::Uploaded
    );

    let summary = manager.summary().await.unwrap();
    assert_eq!(summary.files, 1);
    assert_eq!(summary.total_size, 3);
    assert_eq!(summary.total_progress, 100.0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_upload_empties_collection() {
    let remote = Arc::new(MemoryRemote::new().with_part_delay(Duration::from_secs(30)));
    let handle = start(&remote, settings(4, 1));
    let manager = &handle.manager;
    let mut watcher = manager.subscribe_events();

    let ids = manager.enqueue_files(vec![file("a", 8), file("b", 8)]).await.unwrap();
    manager.set_upload_open(true).await.unwrap();
    wait_for_status(&mut watcher, ids[0], ItemStatus::Uploading).await;
    let token = manager.item(ids[0]).await.unwrap().unwrap().cancellation;

    manager.cancel_upload().await.unwrap();

    let snapshot = manager.snapshot().await.unwrap();
    assert!(snapshot.items.is_empty());
    assert_eq!(snapshot.current, None);
    assert_eq!(snapshot.flags, UiFlags::default());
    assert!(token.is_cancelled());
    wait_idle(manager).await;
    assert_eq!(remote.file_count().await, 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejects_invalid_selections() {
    let remote = Arc::new(MemoryRemote::new());
    let handle = start(&remote, settings(4, 1));
    let manager = &handle.manager;

    let err = manager
        .enqueue_files(vec![file("ok", 4), file("empty", 0)])
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::EmptyFile(name) if name == "empty"));

    assert!(manager.enqueue_folder(vec![child("f", "a", 0)], "f").await.is_err());
    assert!(manager.enqueue_folder(vec![], "").await.is_err());
    assert!(manager.snapshot().await.unwrap().items.is_empty());

    assert!(manager.update_settings(settings(4, 0)).await.is_err());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_settings_apply_to_later_transfers() {
    let remote = Arc::new(MemoryRemote::new());
    let handle = start(&remote, settings(4, 1));
    let manager = &handle.manager;

    let first = manager.enqueue_files(vec![file("a", 8)]).await.unwrap();
    wait_idle(manager).await;

    manager.update_settings(settings(8, 1)).await.unwrap();
    manager.set_base_path("/later").await.unwrap();
    let second = manager.enqueue_files(vec![file("b", 8)]).await.unwrap();
    wait_idle(manager).await;

    assert_eq!(manager.item(first[0]).await.unwrap().unwrap().total_chunks, 2);
    assert_eq!(manager.item(second[0]).await.unwrap().unwrap().total_chunks, 1);
    assert!(remote.file("/later", "b").await.is_some());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ui_flags_and_filtered_events() {
    let remote = Arc::new(MemoryRemote::new());
    let handle = start(&remote, settings(4, 1));
    let manager = &handle.manager;
    let mut idle = manager.subscribe_filtered(|event| matches!(event, UploadEvent::Idle));

    manager.toggle_collapse().await.unwrap();
    manager.set_file_dialog_open(true).await.unwrap();
    manager.set_folder_dialog_open(true).await.unwrap();
    let flags = manager.snapshot().await.unwrap().flags;
    assert!(flags.collapse && flags.file_dialog_open && flags.folder_dialog_open);

    let folder = manager.enqueue_folder(vec![child("f", "a", 4)], "f").await.unwrap();
    timeout(WAIT, idle.recv()).await.unwrap().unwrap();

    manager.toggle_folder_collapsed(folder).await.unwrap();
    assert!(manager.item(folder).await.unwrap().unwrap().collapsed);
    assert_eq!(manager.rows().await.unwrap().len(), 1);

    assert_eq!(manager.clear_all().await.unwrap(), 2);
    assert_eq!(manager.snapshot().await.unwrap().flags, UiFlags::default());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_aborts_active_transfer() {
    let remote = Arc::new(MemoryRemote::new().with_part_delay(Duration::from_secs(30)));
    let handle = start(&remote, settings(4, 1));
    let mut watcher = handle.manager.subscribe_events();

    let ids = handle.manager.enqueue_files(vec![file("a", 8)]).await.unwrap();
    wait_for_status(&mut watcher, ids[0], ItemStatus::Uploading).await;
    let token = handle.manager.item(ids[0]).await.unwrap().unwrap().cancellation;

    timeout(WAIT, handle.shutdown()).await.unwrap().unwrap();
    assert!(token.is_cancelled());
}
