pub mod chunked;
pub mod http;
pub mod memory;

pub use chunked::{ChunkedUploader, FileCipher, FileTransfer, TransferReceipt};
pub use http::HttpRemoteApi;
pub use memory::{Fault, MemoryRemote};
