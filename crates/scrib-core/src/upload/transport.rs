//! Binary transfer seam

use std::future::Future;

use crate::error::RemoteError;
use crate::models::UploadTask;

/// Identity of the finalized remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Remote object identifier
    pub file_id: String,
    /// Public URL of the uploaded object
    pub remote_url: String,
}

/// Transport used by the upload queue to move chunks to the remote.
///
/// Implemented by [`HttpRemote`](crate::sync::HttpRemote) in production
/// and by in-memory fakes in tests. Futures must be `Send` because the
/// queue drives transfers on spawned worker tasks.
pub trait UploadTransport {
    /// Send one chunk; acknowledged chunks are never re-sent
    fn upload_chunk(
        &self,
        task: &UploadTask,
        chunk_index: u32,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Tell the remote all chunks are present and obtain the object identity
    fn finalize_upload(
        &self,
        task: &UploadTask,
    ) -> impl Future<Output = Result<UploadReceipt, RemoteError>> + Send;
}
