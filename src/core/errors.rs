use thiserror::Error;
use super::types::{ItemId, ItemStatus};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Server error: status code {status_code}, message: {message}")]
    Remote {
        status_code: u16,
        message: String,
    },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Upload aborted")]
    Aborted,

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("File is empty: {0}")]
    EmptyFile(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Manager shut down")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn remote(status_code: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status_code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Duplicate-name condition, either typed or reported as text by the remote.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists(_) => true,
            Self::Remote { message, .. } => message.contains("already exists"),
            _ => false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Failures worth another attempt at the transport level.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Remote { status_code, .. } => *status_code >= 500 && !self.is_already_exists(),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;

/// How a folder creation or file transfer settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Exists,
    Aborted,
    Failed(String),
}

impl TransferOutcome {
    pub fn classify<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Completed,
            Err(err) if err.is_already_exists() => Self::Exists,
            Err(err) if err.is_aborted() => Self::Aborted,
            Err(err) => Self::Failed(err.to_string()),
        }
    }

    pub fn status(&self) -> ItemStatus {
        match self {
            Self::Completed => ItemStatus::Uploaded,
            Self::Exists => ItemStatus::Skipped,
            Self::Aborted => ItemStatus::Cancelled,
            Self::Failed(_) => ItemStatus::Failed,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failed(message) => Some(message),
            _ => None,
        }
    }
}
