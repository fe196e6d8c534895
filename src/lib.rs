pub mod config;
pub mod core;
pub mod uploaders;
pub mod utils;

pub use config::{Config, UploadSettings};

pub use core::{
    FileHandle,
    ItemId,
    ItemStatus,
    ManagerOptions,
    RemoteApi,
    Result,
    UploadError,
    UploadEvent,
    UploadItem,
    UploadManager,
    UploadManagerHandle,
    UploadSnapshot,
};

pub use uploaders::{
    ChunkedUploader,
    HttpRemoteApi,
    MemoryRemote,
};

#[cfg(test)]
mod tests;
