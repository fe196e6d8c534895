use super::store::UploadStore;
use super::types::{ItemId, ItemStatus, UploadItem};

/// Whether `item` may leave `NotStarted`: it has not started and its parent
/// folder, if any, has reached a success-like terminal state.
pub fn is_eligible(store: &UploadStore, item: &UploadItem) -> bool {
    if item.status != ItemStatus::NotStarted {
        return false;
    }

    match item.parent_folder_id {
        None => true,
        Some(parent_id) => store
            .get(parent_id)
            .is_some_and(|parent| parent.status.is_success()),
    }
}

/// First eligible id in enqueue order.
pub fn next_eligible(store: &UploadStore) -> Option<ItemId> {
    store
        .items()
        .find(|item| is_eligible(store, item))
        .map(|item| item.id)
}
