//! Probe outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Outcome of one check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Down,
    Maintenance,
    #[default]
    Unknown,
}

impl Status {
    /// Map any stored or legacy status encoding onto a variant.
    ///
    /// Booleans, 0/1 and the usual string synonyms are understood; anything
    /// else, including null, is `Unknown`.
    pub fn normalize(value: &Value) -> Status {
        match value {
            Value::Bool(true) => Status::Up,
            Value::Bool(false) => Status::Down,
            Value::Number(n) => match n.as_i64() {
                Some(1) => Status::Up,
                Some(0) => Status::Down,
                _ => Status::Unknown,
            },
            Value::String(s) => Status::from_label(s),
            _ => Status::Unknown,
        }
    }

    pub fn from_label(label: &str) -> Status {
        match label.trim().to_ascii_lowercase().as_str() {
            "up" | "ok" | "online" | "success" | "healthy" | "true" | "1" => Status::Up,
            "down" | "fail" | "failed" | "failure" | "offline" | "error" | "false" | "0" => {
                Status::Down
            }
            "maintenance" | "maint" | "paused" => Status::Maintenance,
            _ => Status::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "up",
            Status::Down => "down",
            Status::Maintenance => "maintenance",
            Status::Unknown => "unknown",
        }
    }

    /// Down and Unknown both count toward a failure streak.
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Down | Status::Unknown)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Status::normalize(&value))
    }
}

/// One recorded check result. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub latency_seconds: Option<f64>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub ttfb_seconds: Option<f64>,
    #[serde(default)]
    pub incident_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub violation_types: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProbeEntry {
    pub fn new(timestamp: DateTime<Utc>, agent_id: &str, status: Status) -> Self {
        Self {
            timestamp,
            agent_id: agent_id.to_string(),
            status,
            latency_seconds: None,
            ttfb_seconds: None,
            incident_start: None,
            violation_types: Vec::new(),
            error: None,
        }
    }

    pub fn with_latency(mut self, latency: f64) -> Self {
        self.latency_seconds = Some(latency);
        self
    }

    pub fn with_ttfb(mut self, ttfb: f64) -> Self {
        self.ttfb_seconds = Some(ttfb);
        self
    }

    pub fn with_violation(mut self, kind: &str) -> Self {
        self.violation_types.push(kind.to_string());
        self
    }
}

/// Accept numbers, numeric strings and null; anything else reads as absent.
fn lenient_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_legacy_encodings() {
        assert_eq!(Status::normalize(&json!(true)), Status::Up);
        assert_eq!(Status::normalize(&json!(false)), Status::Down);
        assert_eq!(Status::normalize(&json!(null)), Status::Unknown);
        assert_eq!(Status::normalize(&json!(1)), Status::Up);
        assert_eq!(Status::normalize(&json!(0)), Status::Down);
        assert_eq!(Status::normalize(&json!(7)), Status::Unknown);
        assert_eq!(Status::normalize(&json!("OK")), Status::Up);
        assert_eq!(Status::normalize(&json!(" offline ")), Status::Down);
        assert_eq!(Status::normalize(&json!("maintenance")), Status::Maintenance);
        assert_eq!(Status::normalize(&json!("weird")), Status::Unknown);
        assert_eq!(Status::normalize(&json!(["up"])), Status::Unknown);
    }

    #[test]
    fn test_entry_parses_leniently() {
        let entry: ProbeEntry = serde_json::from_value(json!({
            "timestamp": "2024-03-06T02:15:00Z",
            "agent_id": "eu1",
            "status": true,
            "latency_seconds": "0.25",
            "ttfb_seconds": "fast",
        }))
        .unwrap();

        assert_eq!(entry.status, Status::Up);
        assert_eq!(entry.latency_seconds, Some(0.25));
        assert_eq!(entry.ttfb_seconds, None);
        assert!(entry.violation_types.is_empty());

        let bare: ProbeEntry =
            serde_json::from_value(json!({"timestamp": "2024-03-06T02:15:00Z"})).unwrap();
        assert_eq!(bare.status, Status::Unknown);
        assert_eq!(bare.agent_id, "");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Maintenance).unwrap(), "\"maintenance\"");
        assert_eq!(Status::Down.to_string(), "down");
        assert!(Status::Unknown.is_failure());
        assert!(!Status::Maintenance.is_failure());
    }
}
