use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::core::cancellation::cancellable;
use crate::core::{FileRegistration, PartReceipt, PartUpload, RemoteApi, Result, UploadError};

/// Injected failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Textual duplicate-name response
    AlreadyExists,
    /// Any other remote error
    Error(String),
}

impl Fault {
    fn into_error(self, name: &str) -> UploadError {
        match self {
            Fault::AlreadyExists => UploadError::remote(400, format!("{} already exists", name)),
            Fault::Error(message) => UploadError::remote(500, message),
        }
    }
}

/// A part as the remote received it
#[derive(Debug, Clone)]
pub struct StoredPart {
    pub name: String,
    pub part_number: u32,
    pub encrypted: bool,
    pub data: Bytes,
}

#[derive(Default)]
struct MemoryState {
    folders: HashSet<String>,
    files: HashMap<String, FileRegistration>,
    parts: HashMap<String, Vec<StoredPart>>,
}

/// In-process remote for dry runs and tests.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    part_delay: Option<Duration>,
    folder_faults: HashMap<String, Fault>,
    part_faults: HashMap<u32, Fault>,
    register_faults: HashMap<String, Fault>,
    next_id: AtomicI64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    part_calls: AtomicUsize,
}

fn join(path: &str, name: &str) -> String {
    format!("{}/{}", path.trim_end_matches('/'), name)
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every part upload for `delay`.
    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    pub fn with_folder_fault(mut self, name: impl Into<String>, fault: Fault) -> Self {
        self.folder_faults.insert(name.into(), fault);
        self
    }

    /// Fail part `part_number` of every file.
    pub fn with_part_fault(mut self, part_number: u32, fault: Fault) -> Self {
        self.part_faults.insert(part_number, fault);
        self
    }

    pub fn with_register_fault(mut self, name: impl Into<String>, fault: Fault) -> Self {
        self.register_faults.insert(name.into(), fault);
        self
    }

    /// Seed a file the remote already holds.
    pub fn with_existing_file(mut self, path: &str, name: &str) -> Self {
        let registration = FileRegistration {
            name: name.to_string(),
            kind: "file".to_string(),
            path: path.to_string(),
            size: 0,
            owner_id: 0,
            parts: Vec::new(),
            encrypted: false,
            channel_id: None,
        };
        self.state.get_mut().files.insert(join(path, name), registration);
        self
    }

    pub async fn folders(&self) -> Vec<String> {
        let mut folders: Vec<String> = self.state.lock().await.folders.iter().cloned().collect();
        folders.sort();
        folders
    }

    pub async fn file(&self, path: &str, name: &str) -> Option<FileRegistration> {
        self.state.lock().await.files.get(&join(path, name)).cloned()
    }

    pub async fn file_count(&self) -> usize {
        self.state.lock().await.files.len()
    }

    pub async fn stored_parts(&self, upload_id: &str) -> Vec<StoredPart> {
        let mut parts = self
            .state
            .lock()
            .await
            .parts
            .get(upload_id)
            .cloned()
            .unwrap_or_default();
        parts.sort_by_key(|part| part.part_number);
        parts
    }

    /// Highest number of part uploads observed in flight at once.
    pub fn peak_concurrent_parts(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn part_calls(&self) -> usize {
        self.part_calls.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn store_part(&self, part: PartUpload, cancel: &CancellationToken) -> Result<PartReceipt> {
        if let Some(delay) = self.part_delay {
            cancellable(cancel, async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
        }

        if let Some(fault) = self.part_faults.get(&part.part_number) {
            return Err(fault.clone().into_error(&part.part_name));
        }

        let receipt = PartReceipt {
            part_id: self.next_id(),
            channel_id: part.channel_id.unwrap_or_default(),
            size: part.data.len() as u64,
        };

        self.state
            .lock()
            .await
            .parts
            .entry(part.upload_id)
            .or_default()
            .push(StoredPart {
                name: part.part_name,
                part_number: part.part_number,
                encrypted: part.encrypted,
                data: part.data,
            });

        Ok(receipt)
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn create_folder(
        &self,
        name: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        if cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }
        if let Some(fault) = self.folder_faults.get(name) {
            return Err(fault.clone().into_error(name));
        }

        let full_path = join(path, name);
        let mut state = self.state.lock().await;
        if !state.folders.insert(full_path.clone()) {
            return Err(UploadError::AlreadyExists(full_path));
        }

        debug!(folder = %full_path, "Folder stored");
        Ok(Some(self.next_id().to_string()))
    }

    async fn file_exists(&self, name: &str, path: &str, cancel: &CancellationToken) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }

        Ok(self.state.lock().await.files.contains_key(&join(path, name)))
    }

    async fn upload_part(&self, part: PartUpload, cancel: &CancellationToken) -> Result<PartReceipt> {
        if cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }

        self.part_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.store_part(part, cancel).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn register_file(
        &self,
        registration: &FileRegistration,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        if cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }
        if let Some(fault) = self.register_faults.get(&registration.name) {
            return Err(fault.clone().into_error(&registration.name));
        }

        let full_path = join(&registration.path, &registration.name);
        let mut state = self.state.lock().await;
        if state.files.contains_key(&full_path) {
            return Err(UploadError::AlreadyExists(full_path));
        }

        state.files.insert(full_path, registration.clone());
        Ok(Some(self.next_id().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(number: u32) -> PartUpload {
        PartUpload {
            upload_id: "u1".to_string(),
            file_name: "a.bin".to_string(),
            part_name: format!("a.bin.part.{:03}", number),
            part_number: number,
            channel_id: Some(3),
            encrypted: false,
            data: Bytes::from_static(b"abcd"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_folder() {
        let remote = MemoryRemote::new();
        let cancel = CancellationToken::new();

        assert!(remote.create_folder("docs", "/", &cancel).await.unwrap().is_some());
        let err = remote.create_folder("docs", "/", &cancel).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(remote.folders().await, vec!["/docs".to_string()]);
    }

    #[tokio::test]
    async fn test_parts_are_recorded() {
        let remote = MemoryRemote::new();
        let cancel = CancellationToken::new();

        let receipt = remote.upload_part(part(2), &cancel).await.unwrap();
        remote.upload_part(part(1), &cancel).await.unwrap();

        assert_eq!(receipt.channel_id, 3);
        assert_eq!(receipt.size, 4);
        let stored = remote.stored_parts("u1").await;
        assert_eq!(stored.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(remote.peak_concurrent_parts(), 1);
    }

    #[tokio::test]
    async fn test_delayed_part_aborts() {
        let remote = MemoryRemote::new().with_part_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = remote.upload_part(part(1), &cancel).await.unwrap_err();
        assert!(err.is_aborted());
        assert!(remote.stored_parts("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_existing_file_seed() {
        let remote = MemoryRemote::new().with_existing_file("/", "a.bin");
        let cancel = CancellationToken::new();

        assert!(remote.file_exists("a.bin", "/", &cancel).await.unwrap());
        assert!(!remote.file_exists("b.bin", "/", &cancel).await.unwrap());
    }
}
