pub mod progress;
pub mod retry;
pub mod scan;

pub use progress::{SpeedCalculator, format_bytes, format_duration, format_speed};
pub use retry::{Backoff, RetryPolicy, RetryStrategy, retry_with_policy};
pub use scan::{FolderSelection, read_files, scan_folder};
