//! Upload task repository

use std::collections::BTreeSet;
use std::path::PathBuf;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{UploadStatus, UploadTask, UploadTaskId};

/// `SQLite` repository for the upload task queue.
pub struct SqliteUploadStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteUploadStore<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    const SELECT: &'static str =
        "SELECT id, file_id, source_path, filename, file_size, mime_type, status,
                chunk_size, total_chunks, uploaded_chunks, retry_count, max_retries,
                remote_url, last_error, created_at, updated_at
         FROM upload_tasks";

    fn parse_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<UploadTask> {
        let to_conversion_err = |idx: usize, e: Box<dyn std::error::Error + Send + Sync>| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e)
        };

        let id: String = row.get(0)?;
        let source_path: String = row.get(2)?;
        let status: String = row.get(6)?;
        let chunks_text: String = row.get(9)?;

        let uploaded_chunks: BTreeSet<u32> = serde_json::from_str(&chunks_text)
            .map_err(|e| to_conversion_err(9, Box::new(e)))?;

        Ok(UploadTask {
            id: id.parse().map_err(|e| {
                to_conversion_err(0, Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
            })?,
            file_id: row.get(1)?,
            source_path: PathBuf::from(source_path),
            filename: row.get(3)?,
            file_size: u64::try_from(row.get::<_, i64>(4)?).unwrap_or(0),
            mime_type: row.get(5)?,
            status: status
                .parse()
                .map_err(|e: Error| to_conversion_err(6, Box::new(e)))?,
            chunk_size: row.get(7)?,
            total_chunks: row.get(8)?,
            uploaded_chunks,
            retry_count: row.get(10)?,
            max_retries: row.get(11)?,
            remote_url: row.get(12)?,
            last_error: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    /// Persist a new task
    pub fn insert(&self, task: &UploadTask) -> Result<()> {
        self.conn.execute(
            "INSERT INTO upload_tasks
                 (id, file_id, source_path, filename, file_size, mime_type, status,
                  chunk_size, total_chunks, uploaded_chunks, retry_count, max_retries,
                  remote_url, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                task.id.to_string(),
                task.file_id,
                task.source_path.to_string_lossy(),
                task.filename,
                i64::try_from(task.file_size).unwrap_or(i64::MAX),
                task.mime_type,
                task.status.as_str(),
                task.chunk_size,
                task.total_chunks,
                serde_json::to_string(&task.uploaded_chunks)?,
                task.retry_count,
                task.max_retries,
                task.remote_url,
                task.last_error,
                task.created_at,
                task.updated_at
            ],
        )?;
        Ok(())
    }

    /// Get a task by ID
    pub fn get(&self, id: UploadTaskId) -> Result<Option<UploadTask>> {
        let task = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", Self::SELECT),
                params![id.to_string()],
                Self::parse_task,
            )
            .optional()?;
        Ok(task)
    }

    /// All tasks, oldest first
    pub fn list(&self) -> Result<Vec<UploadTask>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY created_at ASC, id ASC", Self::SELECT))?;
        let tasks = stmt
            .query_map([], Self::parse_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Tasks in the given state, oldest first
    pub fn list_by_status(&self, status: UploadStatus) -> Result<Vec<UploadTask>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE status = ?1 ORDER BY created_at ASC, id ASC",
            Self::SELECT
        ))?;
        let tasks = stmt
            .query_map(params![status.as_str()], Self::parse_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Transition `pending → uploading`. Returns the claimed snapshot, or
    /// `None` if another worker already took the task.
    pub fn claim(&self, id: UploadTaskId, now: i64) -> Result<Option<UploadTask>> {
        let rows = self.conn.execute(
            "UPDATE upload_tasks SET status = 'uploading', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now, id.to_string()],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        self.get(id)
    }

    /// Record an acknowledged chunk. Already-recorded chunks are a no-op.
    pub fn record_chunk(&self, id: UploadTaskId, chunk_index: u32, now: i64) -> Result<()> {
        let task = self
            .get(id)?
            .ok_or_else(|| Error::not_found("upload_tasks", id))?;
        let mut chunks = task.uploaded_chunks;
        if !chunks.insert(chunk_index) {
            return Ok(());
        }
        self.conn.execute(
            "UPDATE upload_tasks SET uploaded_chunks = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&chunks)?, now, id.to_string()],
        )?;
        Ok(())
    }

    /// Terminal success: store the remote identity of the object
    pub fn mark_completed(
        &self,
        id: UploadTaskId,
        file_id: &str,
        remote_url: &str,
        now: i64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE upload_tasks
             SET status = 'completed', file_id = ?1, remote_url = ?2,
                 last_error = NULL, updated_at = ?3
             WHERE id = ?4",
            params![file_id, remote_url, now, id.to_string()],
        )?;
        Ok(())
    }

    /// Record a failed attempt; consumes one retry.
    /// Acknowledged chunks stay valid for a future resume. A no-op when
    /// the task is no longer in flight, so a chunk error racing a user
    /// cancel cannot clobber the cancelled state.
    pub fn mark_failed(&self, id: UploadTaskId, error: &str, now: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE upload_tasks
             SET status = 'failed', retry_count = retry_count + 1,
                 last_error = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'uploading'",
            params![error, now, id.to_string()],
        )?;
        Ok(())
    }

    /// Cancel a pending or in-flight task
    pub fn mark_cancelled(&self, id: UploadTaskId, now: i64) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE upload_tasks SET status = 'cancelled', updated_at = ?1
             WHERE id = ?2 AND status IN ('pending', 'uploading')",
            params![now, id.to_string()],
        )?;
        if rows == 0 {
            return Err(Error::InvalidInput(format!(
                "upload task {id} is not cancellable"
            )));
        }
        Ok(())
    }

    /// Manual retry of a failed task with budget remaining
    pub fn requeue_for_retry(&self, id: UploadTaskId, now: i64) -> Result<()> {
        let task = self
            .get(id)?
            .ok_or_else(|| Error::not_found("upload_tasks", id))?;
        if !task.can_retry() {
            return Err(Error::InvalidInput(format!(
                "upload task {id} cannot be retried (status {}, {} of {} retries used)",
                task.status, task.retry_count, task.max_retries
            )));
        }
        self.conn.execute(
            "UPDATE upload_tasks SET status = 'pending', updated_at = ?1 WHERE id = ?2",
            params![now, id.to_string()],
        )?;
        Ok(())
    }

    /// Discard a terminal task and its chunk bookkeeping
    pub fn delete(&self, id: UploadTaskId) -> Result<()> {
        let task = self
            .get(id)?
            .ok_or_else(|| Error::not_found("upload_tasks", id))?;
        if !task.status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "upload task {id} is still {}; cancel it first",
                task.status
            )));
        }
        self.conn
            .execute("DELETE FROM upload_tasks WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }
}
