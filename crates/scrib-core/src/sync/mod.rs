//! Sync engine: push/pull orchestration, conflict resolution, HTTP remote

pub mod backoff;
mod engine;
mod http;
mod remote;
pub mod resolver;

pub use engine::{SyncEngine, SyncListener, SyncReport};
pub use http::HttpRemote;
pub use remote::{PullBatch, PushOutcome, PushRequest, RemoteChange, RemoteSync};
