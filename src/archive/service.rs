//! In-memory archive state with write-behind persistence.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::daily::{ArchivePolicy, DailyArchive};
use super::recent::RecentEntries;
use crate::db::{load_json, save_json, Persistence, KEY_DAILY_ARCHIVE, KEY_RECENT_ENTRIES};
use crate::status::ProbeEntry;

struct ArchiveState {
    daily: DailyArchive,
    recent: RecentEntries,
    dirty: bool,
}

/// Readers take cloned snapshots; only the archive writer task calls `apply`.
pub struct ArchiveService {
    store: Arc<dyn Persistence>,
    policy: ArchivePolicy,
    state: RwLock<ArchiveState>,
}

impl ArchiveService {
    pub fn load(store: Arc<dyn Persistence>, policy: ArchivePolicy) -> Self {
        let (mut daily, skipped_days) =
            DailyArchive::from_value(load_json::<Value>(store.as_ref(), KEY_DAILY_ARCHIVE).unwrap_or(Value::Null));
        if skipped_days > 0 {
            tracing::warn!("Archive: Skipped {} unparseable archive rows", skipped_days);
        }
        daily.prune(policy.retention_days);

        let (recent, skipped_entries) =
            RecentEntries::from_value(load_json::<Value>(store.as_ref(), KEY_RECENT_ENTRIES).unwrap_or(Value::Null));
        if skipped_entries > 0 {
            tracing::warn!("Archive: Skipped {} unparseable recent entries", skipped_entries);
        }

        tracing::info!("Archive: Loaded {} days, {} recent entries", daily.len(), recent.len());

        Self {
            store,
            policy,
            state: RwLock::new(ArchiveState {
                daily,
                recent,
                dirty: false,
            }),
        }
    }

    pub fn policy(&self) -> ArchivePolicy {
        self.policy
    }

    pub fn apply(&self, entry: ProbeEntry) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.daily.record(&entry, &self.policy);
        state.recent.push(entry, self.policy.retention_days);
        state.dirty = true;
    }

    /// Write both blobs if anything changed since the last persist.
    pub fn persist(&self) {
        let (daily, recent) = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if !state.dirty {
                return;
            }
            state.dirty = false;
            let recent: Vec<ProbeEntry> = state.recent.entries().cloned().collect();
            (state.daily.clone(), recent)
        };

        let mut failed = false;
        if let Err(e) = save_json(self.store.as_ref(), KEY_DAILY_ARCHIVE, &daily) {
            tracing::error!("Archive: Failed to save daily archive: {}", e);
            failed = true;
        }
        if let Err(e) = save_json(self.store.as_ref(), KEY_RECENT_ENTRIES, &recent) {
            tracing::error!("Archive: Failed to save recent entries: {}", e);
            failed = true;
        }
        if failed {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.dirty = true;
        }
    }

    pub fn snapshot(&self) -> DailyArchive {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.daily.clone()
    }

    pub fn recent(&self) -> Vec<ProbeEntry> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.recent.entries().cloned().collect()
    }

    pub fn latest_by_agent(&self) -> BTreeMap<String, ProbeEntry> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.recent.latest_by_agent()
    }
}
