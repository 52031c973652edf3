//! Maintenance windows: recurrence resolution, lookup and notices.

mod notices;
mod recurrence;

pub use notices::*;
pub use recurrence::*;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::{load_json, save_json, DbError, Persistence, KEY_MAINTENANCE_WINDOWS};

/// A definition together with the occurrence that matched.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveWindow {
    pub definition: MaintenanceWindowDefinition,
    pub occurrence: Occurrence,
}

/// One line of the maintenance report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowListing {
    pub agent: String,
    pub label: String,
    pub recurrence: Recurrence,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_active: bool,
}

/// Resolves the configured windows against arbitrary timestamps.
#[derive(Debug, Clone)]
pub struct MaintenanceResolver {
    definitions: Vec<MaintenanceWindowDefinition>,
    tz: FixedOffset,
}

impl MaintenanceResolver {
    pub fn new(definitions: Vec<MaintenanceWindowDefinition>, tz: FixedOffset) -> Self {
        Self { definitions, tz }
    }

    /// Load stored definitions, skipping any that do not parse.
    pub fn load(store: &dyn Persistence, tz: FixedOffset) -> Self {
        let raw: Vec<serde_json::Value> =
            load_json(store, KEY_MAINTENANCE_WINDOWS).unwrap_or_default();
        let mut definitions = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value(value) {
                Ok(def) => definitions.push(def),
                Err(e) => tracing::warn!("Maintenance: Skipping malformed window definition: {}", e),
            }
        }
        Self::new(definitions, tz)
    }

    pub fn save(&self, store: &dyn Persistence) -> Result<(), DbError> {
        save_json(store, KEY_MAINTENANCE_WINDOWS, &self.definitions)
    }

    pub fn definitions(&self) -> &[MaintenanceWindowDefinition] {
        &self.definitions
    }

    pub fn resolve(
        &self,
        def: &MaintenanceWindowDefinition,
        at: DateTime<Utc>,
        mode: ResolveMode,
    ) -> Option<Occurrence> {
        resolve_occurrence(def, at, mode, &self.tz)
    }

    /// First window targeting the agent (or all agents) that contains `at`.
    pub fn find_active_window(&self, agent_id: &str, at: DateTime<Utc>) -> Option<ActiveWindow> {
        self.definitions
            .iter()
            .filter(|def| def.targets(agent_id))
            .find_map(|def| {
                self.resolve(def, at, ResolveMode::Current)
                    .map(|occurrence| ActiveWindow {
                        definition: def.clone(),
                        occurrence,
                    })
            })
    }

    /// Active and next upcoming occurrences of every window, for reporting.
    pub fn list_windows(&self, at: DateTime<Utc>) -> Vec<WindowListing> {
        let mut listed: BTreeMap<(DateTime<Utc>, String), WindowListing> = BTreeMap::new();

        for def in &self.definitions {
            for mode in [ResolveMode::Current, ResolveMode::Next] {
                if let Some(occ) = self.resolve(def, at, mode) {
                    listed
                        .entry((occ.start, def.agent.clone()))
                        .or_insert_with(|| WindowListing {
                            agent: def.agent.clone(),
                            label: def.display_label().to_string(),
                            recurrence: def.recurrence,
                            start: occ.start,
                            end: occ.end,
                            is_active: occ.is_active,
                        });
                }
            }
        }

        listed.into_values().collect()
    }
}
