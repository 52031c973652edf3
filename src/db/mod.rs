//! Persistence module for uptrail.
//!
//! Every piece of state is a JSON blob stored under one logical key. Writes
//! are atomic per key; nothing is transactional across keys.

mod memory;
mod store;

pub use memory::*;
pub use store::*;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub const KEY_AGENTS: &str = "agents";
pub const KEY_JOB_QUEUE: &str = "remote_queue";
pub const KEY_QUEUE_METRICS: &str = "remote_queue_metrics";
pub const KEY_DAILY_ARCHIVE: &str = "daily_archive";
pub const KEY_RECENT_ENTRIES: &str = "recent_entries";
pub const KEY_MAINTENANCE_WINDOWS: &str = "maintenance_windows";
pub const KEY_MAINTENANCE_NOTICES: &str = "maintenance_notices";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Key/blob storage shared by every component.
pub trait Persistence: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, DbError>;
    fn save(&self, key: &str, blob: &str) -> Result<(), DbError>;
}

/// Load and decode a blob. Missing, unreadable and undecodable blobs all read as `None`.
pub fn load_json<T: DeserializeOwned>(store: &dyn Persistence, key: &str) -> Option<T> {
    let blob = match store.load(key) {
        Ok(Some(blob)) => blob,
        Ok(None) => return None,
        Err(e) => {
            tracing::error!("Persistence: Failed to load {}: {}", key, e);
            return None;
        }
    };

    match serde_json::from_str(&blob) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Persistence: Discarding malformed {} blob: {}", key, e);
            None
        }
    }
}

/// Encode and save a blob.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn Persistence,
    key: &str,
    value: &T,
) -> Result<(), DbError> {
    let blob = serde_json::to_string(value)?;
    store.save(key, &blob)
}
