//! Per-day rollups of probe outcomes.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::clamp_retention_days;
use crate::status::{ProbeEntry, Status};

/// Agent id used for entries that arrive without one.
pub const UNATTRIBUTED_AGENT: &str = "default";

/// How entries are bucketed and how long days are kept.
#[derive(Debug, Clone, Copy)]
pub struct ArchivePolicy {
    pub tz: FixedOffset,
    pub retention_days: u32,
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self {
            tz: Utc.fix(),
            retention_days: 90,
        }
    }
}

/// Status and timing counters for one scope (a day, or one agent within a day).
///
/// Stored counters of the wrong type read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    #[serde(deserialize_with = "lenient_count")]
    pub up: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub down: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub unknown: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub maintenance: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub total: u64,
    #[serde(deserialize_with = "lenient_sum")]
    pub latency_sum: f64,
    #[serde(deserialize_with = "lenient_count")]
    pub latency_count: u64,
    #[serde(deserialize_with = "lenient_sum")]
    pub ttfb_sum: f64,
    #[serde(deserialize_with = "lenient_count")]
    pub ttfb_count: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub violations: u64,
    #[serde(deserialize_with = "lenient_types")]
    pub violation_types: BTreeMap<String, u64>,
}

impl Counters {
    pub fn apply(&mut self, entry: &ProbeEntry) {
        match entry.status {
            Status::Up => self.up += 1,
            Status::Down => self.down += 1,
            Status::Maintenance => self.maintenance += 1,
            Status::Unknown => self.unknown += 1,
        }
        self.total += 1;

        if let Some(latency) = usable_seconds(entry.latency_seconds) {
            self.latency_sum += latency;
            self.latency_count += 1;
        }
        if let Some(ttfb) = usable_seconds(entry.ttfb_seconds) {
            self.ttfb_sum += ttfb;
            self.ttfb_count += 1;
        }

        let kinds: Vec<&str> = entry
            .violation_types
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .collect();
        if !kinds.is_empty() {
            self.violations += 1;
            for kind in kinds {
                *self.violation_types.entry(kind.to_string()).or_insert(0) += 1;
            }
        }
    }

    pub fn merge(&mut self, other: &Counters) {
        self.up += other.up;
        self.down += other.down;
        self.unknown += other.unknown;
        self.maintenance += other.maintenance;
        self.total += other.total;
        self.latency_sum += other.latency_sum;
        self.latency_count += other.latency_count;
        self.ttfb_sum += other.ttfb_sum;
        self.ttfb_count += other.ttfb_count;
        self.violations += other.violations;
        for (kind, count) in &other.violation_types {
            *self.violation_types.entry(kind.clone()).or_insert(0) += count;
        }
    }

    /// Checks that count toward uptime: everything not suppressed by maintenance.
    pub fn effective_total(&self) -> u64 {
        self.total.saturating_sub(self.maintenance)
    }

    /// Percentage of effective checks that were up. No traffic reads as 100.
    pub fn uptime(&self) -> f64 {
        match self.effective_total() {
            0 => 100.0,
            effective => self.up as f64 / effective as f64 * 100.0,
        }
    }

    pub fn avg_latency(&self) -> Option<f64> {
        average(self.latency_sum, self.latency_count)
    }

    pub fn avg_ttfb(&self) -> Option<f64> {
        average(self.ttfb_sum, self.ttfb_count)
    }
}

fn usable_seconds(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

fn average(sum: f64, count: u64) -> Option<f64> {
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// One calendar day, globally and per agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyRecord {
    #[serde(deserialize_with = "lenient_timestamp")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_counters")]
    pub totals: Counters,
    #[serde(deserialize_with = "lenient_agents")]
    pub agents: BTreeMap<String, Counters>,
}

impl DailyRecord {
    /// Anything that is not an object reads as an empty day.
    fn from_value_lenient(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

fn count_of(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(count_of(&Value::deserialize(deserializer)?))
}

fn lenient_sum<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let sum = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(sum.filter(|f: &f64| f.is_finite()).unwrap_or(0.0))
}

fn lenient_types<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<String, u64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), count_of(v))).collect(),
        _ => BTreeMap::new(),
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(serde_json::from_value(Value::deserialize(deserializer)?).ok())
}

fn lenient_counters<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Counters, D::Error> {
    Ok(serde_json::from_value(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_agents<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<String, Counters>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map
            .into_iter()
            .map(|(agent, counters)| (agent, serde_json::from_value(counters).unwrap_or_default()))
            .collect(),
        _ => BTreeMap::new(),
    })
}

/// Day-keyed archive with bounded retention.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DailyArchive {
    days: BTreeMap<NaiveDate, DailyRecord>,
}

impl DailyArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a stored archive. Rows with a bad date key are skipped; the
    /// second value is how many were skipped. Bad counters read as zero.
    pub fn from_value(value: Value) -> (Self, usize) {
        let mut archive = Self::new();
        let mut skipped = 0;

        let days = match value {
            Value::Object(map) => map.into_iter().collect::<Vec<_>>(),
            Value::Null => Vec::new(),
            _ => return (archive, 1),
        };

        for (key, row) in days {
            let date = match NaiveDate::parse_from_str(key.trim(), "%Y-%m-%d") {
                Ok(date) => date,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            archive.days.insert(date, DailyRecord::from_value_lenient(row));
        }

        (archive, skipped)
    }

    /// Fold one entry into its day and agent, then apply retention.
    pub fn record(&mut self, entry: &ProbeEntry, policy: &ArchivePolicy) {
        let day = entry.timestamp.with_timezone(&policy.tz).date_naive();
        let agent_id = match entry.agent_id.trim() {
            "" => UNATTRIBUTED_AGENT,
            id => id,
        };

        let record = self.days.entry(day).or_default();
        record.totals.apply(entry);
        record
            .agents
            .entry(agent_id.to_string())
            .or_default()
            .apply(entry);

        record.first_seen = Some(match record.first_seen {
            Some(seen) => seen.min(entry.timestamp),
            None => entry.timestamp,
        });
        record.last_seen = Some(match record.last_seen {
            Some(seen) => seen.max(entry.timestamp),
            None => entry.timestamp,
        });

        self.prune(policy.retention_days);
    }

    /// Drop the oldest days beyond the retention setting. Returns how many were dropped.
    pub fn prune(&mut self, retention_days: u32) -> usize {
        let keep = clamp_retention_days(retention_days) as usize;
        let mut dropped = 0;
        while self.days.len() > keep {
            self.days.pop_first();
            dropped += 1;
        }
        dropped
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DailyRecord> {
        self.days.get(&date)
    }

    /// The newest `count` records, oldest first.
    pub fn last_days(&self, count: usize) -> Vec<(NaiveDate, &DailyRecord)> {
        let skip = self.days.len().saturating_sub(count);
        self.days.iter().skip(skip).map(|(d, r)| (*d, r)).collect()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}
