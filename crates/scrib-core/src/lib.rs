//! scrib-core - Local-first persistence and sync engine for Scrib
//!
//! This crate contains the record store, mutation tracking, durable sync
//! queue, conflict resolution, and the chunked upload queue shared by all
//! Scrib clients. Every mutation lands in `SQLite` first and is replayed
//! against the remote in the background.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;
pub mod sync;
pub mod upload;

pub use config::{EngineConfig, RemoteConfig};
pub use error::{Error, RemoteError, Result};
pub use models::{Record, RecordId};
pub use service::DatabaseService;
pub use sync::SyncEngine;
pub use upload::UploadQueue;
