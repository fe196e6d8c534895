use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use super::errors::{Result, UploadError};
use super::store::{StatusChange, UploadStore};
use super::types::{ItemId, ItemStatus};

/// Fresh token for a new item. Children are linked to their folder's token,
/// so firing the folder reaches every child.
pub fn item_token(parent: Option<&CancellationToken>) -> CancellationToken {
    match parent {
        Some(parent) => parent.child_token(),
        None => CancellationToken::new(),
    }
}

/// Fire `token` unless it already fired.
pub fn abort(token: &CancellationToken) -> bool {
    if token.is_cancelled() {
        return false;
    }

    token.cancel();
    true
}

/// Race `future` against `token`; a fired token wins and yields `Aborted`.
pub async fn cancellable<F, T>(token: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(UploadError::Aborted),
        result = future => result,
    }
}

/// All items below `root`, in enqueue order.
pub fn descendants(store: &UploadStore, root: ItemId) -> Vec<ItemId> {
    let mut found = vec![root];
    let mut cursor = 0;

    while cursor < found.len() {
        let parent = found[cursor];
        found.extend(
            store
                .items()
                .filter(|item| item.parent_folder_id == Some(parent))
                .map(|item| item.id),
        );
        cursor += 1;
    }

    found.remove(0);
    found.sort_by_key(|id| store.position(*id));
    found
}

/// Abort `root` and every descendant, then mark the non-terminal ones `Cancelled`.
///
/// Items already in a terminal state keep their status.
pub fn cancel_subtree(store: &mut UploadStore, root: ItemId) -> Vec<StatusChange> {
    let mut targets = descendants(store, root);
    targets.push(root);

    let mut changes = Vec::new();
    for id in targets {
        let Some(item) = store.get(id) else {
            continue;
        };
        if item.status.is_terminal() {
            continue;
        }

        abort(&item.cancellation);
        if let Some(change) = store.set_status(id, ItemStatus::Cancelled) {
            debug!(item = %id, from = ?change.old_status, "Item cancelled");
            changes.push(change);
        }
    }

    changes
}
