//! Chunked, resumable upload queue

#![allow(clippy::cast_possible_truncation)] // chunk lengths are bounded by chunk_size: u32

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinSet;

use crate::config::EngineConfig;
use crate::db::{Database, SqliteUploadStore};
use crate::error::{Error, Result};
use crate::models::{UploadStatus, UploadTask, UploadTaskId};
use crate::upload::transport::{UploadReceipt, UploadTransport};

/// Progress notification emitted as a task moves through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadEvent {
    /// Task the event is about
    pub task_id: UploadTaskId,
    /// Lifecycle state after the transition
    pub status: UploadStatus,
    /// Transfer progress, 0–100
    pub progress: u8,
}

/// Callback invoked on upload lifecycle transitions
pub type UploadListener = Box<dyn Fn(&UploadEvent) + Send>;

/// Drives chunked binary transfers against an [`UploadTransport`].
///
/// Tasks persist across restarts; acknowledged chunks are never re-sent,
/// so an interrupted transfer resumes where it left off. Transfers run
/// concurrently up to the configured limit. Failed tasks are not retried
/// automatically — retry is an explicit user action.
#[derive(Clone)]
pub struct UploadQueue<T> {
    db: Arc<Mutex<Database>>,
    transport: T,
    config: EngineConfig,
    semaphore: Arc<Semaphore>,
    wakeup: Arc<Notify>,
    cancels: Arc<std::sync::Mutex<HashMap<UploadTaskId, Arc<AtomicBool>>>>,
    listeners: Arc<std::sync::Mutex<Vec<UploadListener>>>,
}

impl<T> UploadQueue<T>
where
    T: UploadTransport + Clone + Send + Sync + 'static,
{
    /// Create a queue over a shared database handle
    pub fn new(db: Arc<Mutex<Database>>, transport: T, config: EngineConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.upload_concurrency.max(1)));
        Self {
            db,
            transport,
            config,
            semaphore,
            wakeup: Arc::new(Notify::new()),
            cancels: Arc::new(std::sync::Mutex::new(HashMap::new())),
            listeners: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Register a listener notified on task lifecycle transitions
    pub fn subscribe(&self, listener: UploadListener) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }

    /// Queue a local file for upload. The file is sized immediately; the
    /// transfer starts when the background [`run`](Self::run) loop wakes,
    /// or on an explicit [`drain`](Self::drain).
    pub async fn enqueue(
        &self,
        source_path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
    ) -> Result<UploadTask> {
        let source_path = source_path.into();
        let filename = source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "upload source has no file name: {}",
                    source_path.display()
                ))
            })?;
        let metadata = tokio::fs::metadata(&source_path).await?;
        if !metadata.is_file() {
            return Err(Error::InvalidInput(format!(
                "upload source is not a file: {}",
                source_path.display()
            )));
        }

        let task = UploadTask::new(
            source_path,
            filename,
            metadata.len(),
            mime_type,
            self.config.chunk_size,
            self.config.max_retries,
        );
        {
            let db = self.db.lock().await;
            SqliteUploadStore::new(db.connection()).insert(&task)?;
        }
        tracing::debug!(task = %task.id, chunks = task.total_chunks, "Upload queued");
        self.emit(&task);
        self.wakeup.notify_one();
        Ok(task)
    }

    /// Transfer pending tasks forever, waking on new work or on the
    /// configured poll interval.
    ///
    /// Drain errors are logged and the loop keeps going; stop it by
    /// dropping the task driving this future.
    pub async fn run(&self) {
        loop {
            match self.drain().await {
                Ok(completed) if completed > 0 => {
                    tracing::debug!(completed, "Upload pass finished");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!("Upload pass failed: {err}"),
            }
            tokio::select! {
                () = self.wakeup.notified() => {}
                () = tokio::time::sleep(self.config.upload_poll_interval) => {}
            }
        }
    }

    /// Transfer every pending task, bounded by the configured concurrency.
    /// Returns how many tasks completed.
    pub async fn drain(&self) -> Result<usize> {
        let pending = {
            let db = self.db.lock().await;
            SqliteUploadStore::new(db.connection()).list_by_status(UploadStatus::Pending)?
        };

        let mut workers = JoinSet::new();
        for task in pending {
            let queue = self.clone();
            workers.spawn(async move { queue.run_task(task.id).await });
        }

        let mut completed = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(true)) => completed += 1,
                Ok(Ok(false)) => {}
                Ok(Err(err)) => tracing::warn!("Upload worker error: {err}"),
                Err(err) => tracing::warn!("Upload worker panicked: {err}"),
            }
        }
        Ok(completed)
    }

    /// Cancel a pending or in-flight task. An in-flight transfer stops at
    /// the next chunk boundary; acknowledged chunks are kept.
    pub async fn cancel(&self, id: UploadTaskId) -> Result<()> {
        if let Ok(cancels) = self.cancels.lock() {
            if let Some(flag) = cancels.get(&id) {
                flag.store(true, Ordering::Relaxed);
            }
        }
        let now = chrono::Utc::now().timestamp_millis();
        let db = self.db.lock().await;
        SqliteUploadStore::new(db.connection()).mark_cancelled(id, now)?;
        drop(db);
        self.emit_current(id).await;
        Ok(())
    }

    /// Requeue a failed task with retry budget remaining. The transfer
    /// resumes from the acknowledged chunks.
    pub async fn retry(&self, id: UploadTaskId) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let db = self.db.lock().await;
        SqliteUploadStore::new(db.connection()).requeue_for_retry(id, now)?;
        drop(db);
        self.emit_current(id).await;
        self.wakeup.notify_one();
        Ok(())
    }

    /// Discard a terminal task and its chunk bookkeeping
    pub async fn delete_task(&self, id: UploadTaskId) -> Result<()> {
        let db = self.db.lock().await;
        SqliteUploadStore::new(db.connection()).delete(id)
    }

    /// Get a task by ID
    pub async fn get(&self, id: UploadTaskId) -> Result<Option<UploadTask>> {
        let db = self.db.lock().await;
        SqliteUploadStore::new(db.connection()).get(id)
    }

    /// All tasks, oldest first
    pub async fn list(&self) -> Result<Vec<UploadTask>> {
        let db = self.db.lock().await;
        SqliteUploadStore::new(db.connection()).list()
    }

    async fn run_task(self, id: UploadTaskId) -> Result<bool> {
        let Ok(_permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return Ok(false);
        };

        let now = chrono::Utc::now().timestamp_millis();
        let claimed = {
            let db = self.db.lock().await;
            SqliteUploadStore::new(db.connection()).claim(id, now)?
        };
        let Some(task) = claimed else {
            return Ok(false);
        };
        self.emit(&task);

        let cancel = Arc::new(AtomicBool::new(false));
        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.insert(id, Arc::clone(&cancel));
        }
        let outcome = self.transfer(&task, &cancel).await;
        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.remove(&id);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let completed = match outcome {
            Ok(Some(receipt)) if !cancel.load(Ordering::Relaxed) => {
                let db = self.db.lock().await;
                SqliteUploadStore::new(db.connection()).mark_completed(
                    id,
                    &receipt.file_id,
                    &receipt.remote_url,
                    now,
                )?;
                drop(db);
                tracing::info!(task = %id, file_id = %receipt.file_id, "Upload completed");
                true
            }
            Ok(_) => {
                tracing::info!(task = %id, "Upload cancelled mid-transfer");
                false
            }
            Err(err) => {
                let db = self.db.lock().await;
                SqliteUploadStore::new(db.connection()).mark_failed(id, &err.to_string(), now)?;
                drop(db);
                tracing::warn!(task = %id, "Upload failed: {err}");
                false
            }
        };
        self.emit_current(id).await;
        Ok(completed)
    }

    /// Send every missing chunk, then finalize. Returns `None` if the
    /// transfer was cancelled between chunks.
    async fn transfer(
        &self,
        task: &UploadTask,
        cancel: &AtomicBool,
    ) -> Result<Option<UploadReceipt>> {
        let mut file = tokio::fs::File::open(&task.source_path).await?;
        let mut buf = vec![0_u8; task.chunk_size as usize];
        let mut current = task.clone();

        for index in task.missing_chunks() {
            if cancel.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let len = task.chunk_len(index) as usize;
            file.seek(SeekFrom::Start(
                u64::from(index) * u64::from(task.chunk_size),
            ))
            .await?;
            file.read_exact(&mut buf[..len]).await?;

            self.transport
                .upload_chunk(&current, index, &buf[..len])
                .await?;

            let now = chrono::Utc::now().timestamp_millis();
            {
                let db = self.db.lock().await;
                SqliteUploadStore::new(db.connection()).record_chunk(task.id, index, now)?;
            }
            current.uploaded_chunks.insert(index);
            self.emit(&current);
        }

        if cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let receipt = self.transport.finalize_upload(&current).await?;
        Ok(Some(receipt))
    }

    fn emit(&self, task: &UploadTask) {
        let event = UploadEvent {
            task_id: task.id,
            status: task.status,
            progress: task.progress(),
        };
        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.iter() {
                listener(&event);
            }
        }
    }

    async fn emit_current(&self, id: UploadTaskId) {
        let task = {
            let db = self.db.lock().await;
            SqliteUploadStore::new(db.connection()).get(id)
        };
        if let Ok(Some(task)) = task {
            self.emit(&task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockTransport {
        chunks: StdMutex<Vec<(u32, usize)>>,
        fail_on_index: StdMutex<Option<u32>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockTransport {
        fn sent(&self) -> Vec<(u32, usize)> {
            self.chunks.lock().unwrap().clone()
        }
    }

    impl UploadTransport for Arc<MockTransport> {
        async fn upload_chunk(
            &self,
            _task: &UploadTask,
            chunk_index: u32,
            bytes: &[u8],
        ) -> std::result::Result<(), RemoteError> {
            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if *self.fail_on_index.lock().unwrap() == Some(chunk_index) {
                return Err(RemoteError::Transient("chunk rejected".to_string()));
            }
            self.chunks
                .lock()
                .unwrap()
                .push((chunk_index, bytes.len()));
            Ok(())
        }

        async fn finalize_upload(
            &self,
            task: &UploadTask,
        ) -> std::result::Result<UploadReceipt, RemoteError> {
            Ok(UploadReceipt {
                file_id: format!("file-{}", task.id),
                remote_url: format!("https://cdn.example.com/{}", task.filename),
            })
        }
    }

    fn config(chunk_size: u32) -> EngineConfig {
        EngineConfig::default().with_chunk_size(chunk_size)
    }

    async fn setup(
        config: EngineConfig,
    ) -> (
        UploadQueue<Arc<MockTransport>>,
        Arc<Mutex<Database>>,
        Arc<MockTransport>,
    ) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let transport = Arc::new(MockTransport::default());
        let queue = UploadQueue::new(Arc::clone(&db), Arc::clone(&transport), config);
        (queue, db, transport)
    }

    fn fixture(dir: &tempfile::TempDir, name: &str, size: usize) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, vec![7_u8; size]).unwrap();
        path
    }

    #[tokio::test]
    async fn enqueue_sizes_file_and_computes_chunking() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _db, _transport) = setup(config(30)).await;
        let path = fixture(&dir, "photo.png", 100);

        let task = queue.enqueue(&path, "image/png").await.unwrap();

        assert_eq!(task.status, UploadStatus::Pending);
        assert_eq!(task.file_size, 100);
        assert_eq!(task.total_chunks, 4);
        assert_eq!(task.filename, "photo.png");
        assert_eq!(queue.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn enqueue_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _db, _transport) = setup(config(30)).await;

        let err = queue
            .enqueue(dir.path().join("nope.bin"), "application/octet-stream")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn drain_sends_every_chunk_and_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _db, transport) = setup(config(30)).await;
        let path = fixture(&dir, "photo.png", 100);
        let task = queue.enqueue(&path, "image/png").await.unwrap();

        let completed = queue.drain().await.unwrap();

        assert_eq!(completed, 1);
        assert_eq!(
            transport.sent(),
            vec![(0, 30), (1, 30), (2, 30), (3, 10)]
        );
        let done = queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(done.status, UploadStatus::Completed);
        assert_eq!(done.progress(), 100);
        assert_eq!(done.file_id, Some(format!("file-{}", task.id)));
        assert!(done.remote_url.is_some());
    }

    #[tokio::test]
    async fn resume_skips_acknowledged_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, db, transport) = setup(config(10)).await;
        let path = fixture(&dir, "clip.mp4", 100);
        let task = queue.enqueue(&path, "video/mp4").await.unwrap();

        // Chunks 0-2 were acknowledged before the interruption
        {
            let db = db.lock().await;
            let store = SqliteUploadStore::new(db.connection());
            for index in 0..3 {
                store.record_chunk(task.id, index, 10).unwrap();
            }
        }

        queue.drain().await.unwrap();

        let sent: Vec<u32> = transport.sent().iter().map(|(index, _)| *index).collect();
        assert_eq!(sent, vec![3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(
            queue.get(task.id).await.unwrap().unwrap().status,
            UploadStatus::Completed
        );
    }

    #[tokio::test]
    async fn failed_chunk_keeps_progress_for_manual_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _db, transport) = setup(config(10)).await;
        let path = fixture(&dir, "clip.mp4", 50);
        let task = queue.enqueue(&path, "video/mp4").await.unwrap();
        *transport.fail_on_index.lock().unwrap() = Some(2);

        assert_eq!(queue.drain().await.unwrap(), 0);

        let failed = queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(failed.status, UploadStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.missing_chunks(), vec![2, 3, 4]);

        // No automatic retry: a second drain leaves the task failed
        assert_eq!(queue.drain().await.unwrap(), 0);
        assert_eq!(transport.sent().len(), 2);

        *transport.fail_on_index.lock().unwrap() = None;
        queue.retry(task.id).await.unwrap();
        assert_eq!(queue.drain().await.unwrap(), 1);

        let sent: Vec<u32> = transport.sent().iter().map(|(index, _)| *index).collect();
        assert_eq!(sent, vec![0, 1, 2, 3, 4]);
        assert_eq!(
            queue.get(task.id).await.unwrap().unwrap().status,
            UploadStatus::Completed
        );
    }

    #[tokio::test]
    async fn background_loop_transfers_enqueued_task_without_drain() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _db, transport) = setup(
            config(30).with_upload_poll_interval(std::time::Duration::from_millis(10)),
        )
        .await;
        let worker = queue.clone();
        let handle = tokio::spawn(async move { worker.run().await });

        let path = fixture(&dir, "photo.png", 100);
        let task = queue.enqueue(&path, "image/png").await.unwrap();

        let mut status = UploadStatus::Pending;
        for _ in 0..200 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            status = queue.get(task.id).await.unwrap().unwrap().status;
            if status == UploadStatus::Completed {
                break;
            }
        }
        handle.abort();

        assert_eq!(status, UploadStatus::Completed);
        assert_eq!(transport.sent().len(), 4);
    }

    #[tokio::test]
    async fn concurrency_stays_within_configured_bound() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _db, transport) = setup(config(64).with_upload_concurrency(2)).await;
        for i in 0..5 {
            let path = fixture(&dir, &format!("f{i}.bin"), 64);
            queue.enqueue(&path, "application/octet-stream").await.unwrap();
        }

        assert_eq!(queue.drain().await.unwrap(), 5);
        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancelled_task_is_not_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _db, transport) = setup(config(10)).await;
        let path = fixture(&dir, "clip.mp4", 50);
        let task = queue.enqueue(&path, "video/mp4").await.unwrap();

        queue.cancel(task.id).await.unwrap();
        assert_eq!(queue.drain().await.unwrap(), 0);
        assert!(transport.sent().is_empty());
        assert_eq!(
            queue.get(task.id).await.unwrap().unwrap().status,
            UploadStatus::Cancelled
        );

        // Terminal tasks can be discarded
        queue.delete_task(task.id).await.unwrap();
        assert!(queue.get(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listeners_observe_lifecycle_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _db, _transport) = setup(config(30)).await;
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        queue.subscribe(Box::new(move |event| {
            sink.lock().unwrap().push(*event);
        }));

        let path = fixture(&dir, "photo.png", 100);
        queue.enqueue(&path, "image/png").await.unwrap();
        queue.drain().await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.first().unwrap().status, UploadStatus::Pending);
        let last = events.last().unwrap();
        assert_eq!(last.status, UploadStatus::Completed);
        assert_eq!(last.progress, 100);
    }
}
