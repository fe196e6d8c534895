pub mod cancellation;
pub mod folder;
pub mod progress;
pub mod scheduler;
pub mod store;
mod errors;
mod manager;
mod traits;
mod types;
mod worker;

pub use errors::{Result, TransferOutcome, UploadError};
pub use manager::{FilteredEventReceiver, UploadManager, UploadManagerHandle};
pub use progress::{DisplayRow, UploadSummary};
pub use store::{StatusChange, UploadStore};
pub use traits::{NoopObserver, PartReceipt, PartUpload, RemoteApi, TransferObserver};
pub use types::{
    FileHandle, FileRegistration, ItemId, ItemStatus, ManagerCommand, PartRecord, UiFlags,
    UploadEvent, UploadItem, UploadSnapshot,
};
pub use worker::ManagerOptions;
