mod cipher;

pub use cipher::FileCipher;

use std::sync::Arc;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;
use crate::config::UploadSettings;
use crate::core::cancellation::cancellable;
use crate::core::{
    FileHandle, FileRegistration, PartRecord, PartUpload, RemoteApi, Result, TransferObserver,
    UploadError,
};

/// Byte range of one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// 1-based
    pub part_number: u32,
    pub offset: u64,
    pub size: u64,
}

/// Split `file_size` bytes into parts of at most `chunk_size`, numbered from 1.
pub fn calculate_chunks(file_size: u64, chunk_size: u64) -> Vec<ChunkInfo> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut offset = 0;
    let mut part_number = 1;

    while offset < file_size {
        let size = std::cmp::min(chunk_size, file_size - offset);
        chunks.push(ChunkInfo {
            part_number,
            offset,
            size,
        });
        offset += size;
        part_number += 1;
    }

    chunks
}

/// Remote name for a part. Single-part files keep their own name.
pub fn part_name(file_name: &str, part_number: u32, total_parts: usize, random: bool) -> String {
    if random {
        Uuid::new_v4().simple().to_string()
    } else if total_parts > 1 {
        format!("{}.part.{:03}", file_name, part_number)
    } else {
        file_name.to_string()
    }
}

/// Stable id grouping one file's parts on the remote.
pub fn upload_session_id(name: &str, path: &str, size: u64, owner_id: i64) -> String {
    let digest = Sha256::digest(format!("{}|{}|{}|{}", name, path, size, owner_id));
    format!("{:x}", digest)
}

/// One file transfer
#[derive(Debug, Clone)]
pub struct FileTransfer {
    pub file: FileHandle,
    /// Remote destination directory
    pub path: String,
    pub owner_id: i64,
    pub settings: UploadSettings,
    /// Ask the remote for a same-named file before sending any part
    pub check_existing: bool,
}

/// What the remote returned for a registered file.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReceipt {
    pub parts: Vec<PartRecord>,
    pub remote_id: Option<String>,
}

/// Chunk transfer engine
///
/// Holds no per-file state; every call owns its own part queue.
#[derive(Clone)]
pub struct ChunkedUploader {
    api: Arc<dyn RemoteApi>,
}

impl ChunkedUploader {
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        Self { api }
    }

    pub async fn upload(
        &self,
        transfer: &FileTransfer,
        observer: &dyn TransferObserver,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt> {
        let file = &transfer.file;
        if cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }
        if file.size() == 0 {
            return Err(UploadError::EmptyFile(file.name().to_string()));
        }
        transfer.settings.validate()?;

        if transfer.check_existing {
            let exists = cancellable(cancel, self.api.file_exists(file.name(), &transfer.path, cancel)).await?;
            if exists {
                return Err(UploadError::AlreadyExists(file.name().to_string()));
            }
        }

        let parts = self.upload_parts(transfer, observer, cancel).await?;

        let registration = FileRegistration {
            name: file.name().to_string(),
            kind: "file".to_string(),
            path: transfer.path.clone(),
            size: file.size(),
            owner_id: transfer.owner_id,
            parts,
            encrypted: transfer.settings.encrypt_files,
            channel_id: transfer.settings.channel_id,
        };

        let remote_id = cancellable(cancel, self.api.register_file(&registration, cancel)).await?;
        info!(file = file.name(), path = %transfer.path, parts = registration.parts.len(), "File registered");

        Ok(TransferReceipt {
            parts: registration.parts,
            remote_id,
        })
    }

    /// Upload every part with at most `concurrency` in flight. Returns the
    /// manifest sorted by part number.
    async fn upload_parts(
        &self,
        transfer: &FileTransfer,
        observer: &dyn TransferObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<PartRecord>> {
        let file = &transfer.file;
        let settings = &transfer.settings;
        let total_bytes = file.size();
        let chunks = calculate_chunks(total_bytes, settings.split_file_size);
        let total_chunks = chunks.len();
        observer.on_total_chunks(total_chunks);

        let cipher = match (settings.encrypt_files, settings.encryption_secret.as_deref()) {
            (true, Some(secret)) => Some(Arc::new(FileCipher::new(secret)?)),
            _ => None,
        };
        let salt = cipher.as_ref().map(|cipher| cipher.encoded_salt());
        let upload_id = upload_session_id(file.name(), &transfer.path, total_bytes, transfer.owner_id);
        let semaphore = Arc::new(Semaphore::new(settings.concurrency));

        let mut pending: FuturesUnordered<_> = chunks
            .into_iter()
            .map(|chunk| {
                let semaphore = semaphore.clone();
                let cipher = cipher.clone();
                let part = PartUpload {
                    upload_id: upload_id.clone(),
                    file_name: file.name().to_string(),
                    part_name: part_name(file.name(), chunk.part_number, total_chunks, settings.random_chunking),
                    part_number: chunk.part_number,
                    channel_id: settings.channel_id,
                    encrypted: cipher.is_some(),
                    data: file.bytes().slice(chunk.offset as usize..(chunk.offset + chunk.size) as usize),
                };

                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| UploadError::internal("Part semaphore closed"))?;

                    // No new part once the item is cancelled
                    if cancel.is_cancelled() {
                        return Err(UploadError::Aborted);
                    }

                    let mut part = part;
                    if let Some(cipher) = &cipher {
                        part.data = Bytes::from(cipher.seal(part.part_number, &part.data)?);
                    }

                    let name = part.part_name.clone();
                    let receipt = cancellable(cancel, self.api.upload_part(part, cancel)).await?;
                    Ok((chunk, name, receipt))
                }
            })
            .collect();

        let mut manifest = Vec::with_capacity(total_chunks);
        let mut bytes_done = 0u64;

        while let Some(result) = pending.next().await {
            let (chunk, name, receipt) = match result {
                Ok(done) => done,
                Err(_) if cancel.is_cancelled() => return Err(UploadError::Aborted),
                Err(err) => return Err(err),
            };

            bytes_done += chunk.size;
            debug!(file = file.name(), part = chunk.part_number, bytes_done, total_bytes, "Part stored");

            manifest.push(PartRecord {
                name,
                part_id: receipt.part_id,
                part_number: chunk.part_number,
                size: receipt.size,
                channel_id: receipt.channel_id,
                encrypted: cipher.is_some(),
                salt: salt.clone(),
            });

            observer.on_chunks_completed(manifest.len());
            observer.on_progress(bytes_done as f64 / total_bytes as f64 * 100.0);
        }

        manifest.sort_by_key(|part| part.part_number);
        Ok(manifest)
    }
}
