//! Chunked, resumable binary upload queue

mod queue;
mod transport;

pub use queue::{UploadEvent, UploadListener, UploadQueue};
pub use transport::{UploadReceipt, UploadTransport};
