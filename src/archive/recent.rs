//! Short raw log of recent probe entries.

use chrono::Duration as ChronoDuration;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

use crate::config::clamp_retention_days;
use crate::status::ProbeEntry;

pub const MAX_RECENT_ENTRIES: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct RecentEntries {
    entries: VecDeque<ProbeEntry>,
}

impl RecentEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a stored list, dropping entries that do not parse.
    pub fn from_value(value: Value) -> (Self, usize) {
        let mut recent = Self::new();
        let rows = match value {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            _ => return (recent, 1),
        };

        let mut skipped = 0;
        for row in rows {
            match serde_json::from_value::<ProbeEntry>(row) {
                Ok(entry) => recent.entries.push_back(entry),
                Err(_) => skipped += 1,
            }
        }
        recent
            .entries
            .make_contiguous()
            .sort_by_key(|e| e.timestamp);
        while recent.entries.len() > MAX_RECENT_ENTRIES {
            recent.entries.pop_front();
        }
        (recent, skipped)
    }

    /// Insert in timestamp order, then trim by count and by age relative to
    /// the newest entry.
    pub fn push(&mut self, entry: ProbeEntry, retention_days: u32) {
        let at = self.entries.partition_point(|e| e.timestamp <= entry.timestamp);
        self.entries.insert(at, entry);

        while self.entries.len() > MAX_RECENT_ENTRIES {
            self.entries.pop_front();
        }

        let retention = ChronoDuration::days(clamp_retention_days(retention_days) as i64);
        let cutoff = self
            .entries
            .back()
            .and_then(|newest| newest.timestamp.checked_sub_signed(retention));
        if let Some(cutoff) = cutoff {
            self.entries.retain(|e| e.timestamp >= cutoff);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ProbeEntry> {
        self.entries.iter()
    }

    /// Newest entry for each agent.
    pub fn latest_by_agent(&self) -> BTreeMap<String, ProbeEntry> {
        let mut latest: BTreeMap<String, ProbeEntry> = BTreeMap::new();
        for entry in &self.entries {
            match latest.get(&entry.agent_id) {
                Some(seen) if seen.timestamp > entry.timestamp => {}
                _ => {
                    latest.insert(entry.agent_id.clone(), entry.clone());
                }
            }
        }
        latest
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_push_bounds_count() {
        let mut recent = RecentEntries::new();
        for i in 0..(MAX_RECENT_ENTRIES as i64 + 20) {
            recent.push(ProbeEntry::new(at(i), "eu1", Status::Up), 90);
        }
        assert_eq!(recent.len(), MAX_RECENT_ENTRIES);
        assert_eq!(recent.entries().next().unwrap().timestamp, at(20));
    }

    #[test]
    fn test_push_drops_entries_past_retention() {
        let mut recent = RecentEntries::new();
        recent.push(ProbeEntry::new(at(0), "eu1", Status::Up), 30);
        recent.push(ProbeEntry::new(at(86_400 * 31), "eu1", Status::Down), 30);
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_late_stale_entry_is_not_kept() {
        let mut recent = RecentEntries::new();
        recent.push(ProbeEntry::new(at(86_400 * 40), "eu1", Status::Up), 30);
        recent.push(ProbeEntry::new(at(0), "us1", Status::Down), 30);
        recent.push(ProbeEntry::new(at(86_400 * 20), "us1", Status::Up), 30);

        let times: Vec<_> = recent.entries().map(|e| e.timestamp).collect();
        assert_eq!(times, vec![at(86_400 * 20), at(86_400 * 40)]);
        assert_eq!(recent.latest_by_agent()["us1"].status, Status::Up);
    }

    #[test]
    fn test_latest_by_agent() {
        let mut recent = RecentEntries::new();
        recent.push(ProbeEntry::new(at(0), "eu1", Status::Down), 90);
        recent.push(ProbeEntry::new(at(10), "us1", Status::Down), 90);
        recent.push(ProbeEntry::new(at(20), "eu1", Status::Up), 90);

        let latest = recent.latest_by_agent();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["eu1"].status, Status::Up);
        assert_eq!(latest["us1"].status, Status::Down);
    }

    #[test]
    fn test_from_value_skips_bad_rows() {
        let (recent, skipped) = RecentEntries::from_value(json!([
            {"timestamp": "2024-03-06T02:00:00Z", "agent_id": "eu1", "status": "ok"},
            {"agent_id": "eu1"},
            {"timestamp": "2024-03-06T01:00:00Z", "agent_id": "us1", "status": false}
        ]));
        assert_eq!(skipped, 1);
        assert_eq!(recent.len(), 2);
        let ids: Vec<&str> = recent.entries().map(|e| e.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["us1", "eu1"]);
    }
}
