//! Bounded log of maintenance notices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::db::{load_json, save_json, Persistence, KEY_MAINTENANCE_NOTICES};
use crate::observer::Observer;

pub const MAX_NOTICES: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceNotice {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

pub struct NoticeLog {
    store: Arc<dyn Persistence>,
    observer: Arc<dyn Observer>,
    notices: Mutex<VecDeque<MaintenanceNotice>>,
}

impl NoticeLog {
    pub fn load(store: Arc<dyn Persistence>, observer: Arc<dyn Observer>) -> Self {
        let stored: Vec<MaintenanceNotice> =
            load_json(store.as_ref(), KEY_MAINTENANCE_NOTICES).unwrap_or_default();
        let mut notices: VecDeque<MaintenanceNotice> = stored.into();
        while notices.len() > MAX_NOTICES {
            notices.pop_front();
        }
        Self {
            store,
            observer,
            notices: Mutex::new(notices),
        }
    }

    /// Append a notice, drop the oldest beyond the bound, persist and notify.
    pub fn record(&self, notice: MaintenanceNotice) {
        self.observer
            .on_maintenance_notice_recorded(&notice.message, notice.timestamp);

        let snapshot: Vec<MaintenanceNotice> = {
            let mut notices = self.notices.lock().unwrap_or_else(|e| e.into_inner());
            notices.push_back(notice);
            while notices.len() > MAX_NOTICES {
                notices.pop_front();
            }
            notices.iter().cloned().collect()
        };

        if let Err(e) = save_json(self.store.as_ref(), KEY_MAINTENANCE_NOTICES, &snapshot) {
            tracing::error!("Maintenance: Failed to save notices: {}", e);
        }
    }

    /// Newest last.
    pub fn list(&self) -> Vec<MaintenanceNotice> {
        let notices = self.notices.lock().unwrap_or_else(|e| e.into_inner());
        notices.iter().cloned().collect()
    }
}
