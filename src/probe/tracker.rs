//! Consecutive-failure streaks per agent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::status::{ProbeEntry, Status};

pub const DEFAULT_FAILURE_ALERT_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FailureLevel {
    Warning,
    Alert,
}

#[derive(Debug, Clone, Copy)]
struct Streak {
    count: u32,
    started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct FailureTracker {
    alert_threshold: u32,
    streaks: HashMap<String, Streak>,
}

impl FailureTracker {
    pub fn new(alert_threshold: u32) -> Self {
        Self {
            alert_threshold: alert_threshold.max(1),
            streaks: HashMap::new(),
        }
    }

    /// Update the agent's streak from `entry` and stamp its incident start.
    ///
    /// Up resets the streak, Maintenance leaves it alone.
    pub fn observe(&mut self, entry: &mut ProbeEntry) -> Option<FailureLevel> {
        match entry.status {
            Status::Up => {
                if let Some(streak) = self.streaks.remove(&entry.agent_id) {
                    tracing::info!(
                        "FailureTracker: {} recovered after {} consecutive failures",
                        entry.agent_id,
                        streak.count
                    );
                }
                None
            }
            Status::Maintenance => None,
            Status::Down | Status::Unknown => {
                let streak = self
                    .streaks
                    .entry(entry.agent_id.clone())
                    .and_modify(|s| s.count += 1)
                    .or_insert(Streak {
                        count: 1,
                        started_at: entry.timestamp,
                    });
                entry.incident_start = Some(streak.started_at);

                let level = if streak.count >= self.alert_threshold {
                    FailureLevel::Alert
                } else {
                    FailureLevel::Warning
                };
                let reason = entry
                    .error
                    .clone()
                    .unwrap_or_else(|| entry.violation_types.join(","));
                match level {
                    FailureLevel::Alert => tracing::error!(
                        "FailureTracker: ALERT {} is {} ({} consecutive failures since {}): {}",
                        entry.agent_id,
                        entry.status,
                        streak.count,
                        streak.started_at,
                        reason
                    ),
                    FailureLevel::Warning => tracing::warn!(
                        "FailureTracker: WARNING {} is {} ({} consecutive failures): {}",
                        entry.agent_id,
                        entry.status,
                        streak.count,
                        reason
                    ),
                }
                Some(level)
            }
        }
    }

    pub fn streak(&self, agent_id: &str) -> u32 {
        self.streaks.get(agent_id).map(|s| s.count).unwrap_or(0)
    }
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_ALERT_THRESHOLD)
    }
}
