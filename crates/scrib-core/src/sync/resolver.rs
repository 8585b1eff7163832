//! Conflict field diffing and resolution strategies

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{ResolutionStrategy, SyncConflict};

/// Sentinel field name used when a snapshot is not a JSON object (e.g. a
/// delete tombstone on one side); the whole payload is then in conflict.
pub const WHOLE_PAYLOAD: &str = "_payload";

/// Top-level payload keys whose values differ between the two snapshots,
/// sorted. An empty result means the divergence is benign.
#[must_use]
pub fn conflict_fields(local: &Value, remote: &Value) -> Vec<String> {
    if local == remote {
        return Vec::new();
    }

    let (Some(local_map), Some(remote_map)) = (local.as_object(), remote.as_object()) else {
        // Tombstone vs payload (or other non-object snapshot): everything
        // is in conflict
        return vec![WHOLE_PAYLOAD.to_string()];
    };

    let mut fields: Vec<String> = local_map
        .keys()
        .chain(remote_map.keys())
        .filter(|key| local_map.get(*key) != remote_map.get(*key))
        .cloned()
        .collect();
    fields.sort_unstable();
    fields.dedup();
    fields
}

/// Compute the resolved payload for a conflict.
///
/// `manual_payload` is required for [`ResolutionStrategy::Manual`] and
/// ignored otherwise.
pub fn resolve(
    conflict: &SyncConflict,
    strategy: ResolutionStrategy,
    manual_payload: Option<Value>,
) -> Result<Value> {
    match strategy {
        ResolutionStrategy::Local => Ok(conflict.local_data.clone()),
        ResolutionStrategy::Remote => Ok(conflict.remote_data.clone()),
        ResolutionStrategy::Merge => Ok(merge(conflict)),
        ResolutionStrategy::Manual => manual_payload.ok_or_else(|| {
            Error::InvalidInput("manual resolution requires a payload".to_string())
        }),
    }
}

/// Field-level union: conflicting fields take the newer side's value
/// (record-level timestamps; the envelope carries no per-field versions),
/// agreeing fields are taken as-is.
fn merge(conflict: &SyncConflict) -> Value {
    let local_newer = conflict.local_updated_at >= conflict.remote_updated_at;

    let (Some(local_map), Some(remote_map)) = (
        conflict.local_data.as_object(),
        conflict.remote_data.as_object(),
    ) else {
        // Non-object snapshot on either side: newer side wins wholesale
        return if local_newer {
            conflict.local_data.clone()
        } else {
            conflict.remote_data.clone()
        };
    };

    let (newer, older) = if local_newer {
        (local_map, remote_map)
    } else {
        (remote_map, local_map)
    };

    let mut merged = Map::new();
    for key in older.keys().chain(newer.keys()) {
        if merged.contains_key(key) {
            continue;
        }
        let value = if conflict.conflict_fields.iter().any(|field| field == key) {
            newer.get(key).or_else(|| older.get(key))
        } else {
            // Fields not in conflict agree on both sides
            older.get(key).or_else(|| newer.get(key))
        };
        if let Some(value) = value {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}
