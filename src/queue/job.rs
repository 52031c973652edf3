//! Queue item type and its dedup identity.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Opaque job arguments. Only ever inspected for a few probe hints.
pub type Payload = BTreeMap<String, Value>;

/// A pending check for one agent. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub agent_id: String,
    #[serde(default)]
    pub payload: Payload,
    pub scheduled_at: i64,
    pub created_at: i64,
    #[serde(default)]
    pub priority: i64,
}

/// (agent, scheduled time, payload hash). Unique within a normalized queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub agent_id: String,
    pub scheduled_at: i64,
    pub payload_hash: u64,
}

impl Job {
    pub fn new(agent_id: &str, payload: Payload, scheduled_at: i64, created_at: i64, priority: i64) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            payload,
            scheduled_at,
            created_at,
            priority,
        }
    }

    /// Parse one persisted item. Returns `None` for anything malformed.
    ///
    /// A missing `created_at` falls back to `scheduled_at`, a missing
    /// priority to 0 and a missing payload to empty. Present fields of the
    /// wrong type make the whole item invalid.
    pub fn from_value(value: &Value) -> Option<Job> {
        let obj = value.as_object()?;

        let agent_id = obj.get("agent_id")?.as_str()?.trim();
        if agent_id.is_empty() {
            return None;
        }

        let scheduled_at = obj.get("scheduled_at")?.as_i64()?;
        if !is_representable(scheduled_at) {
            return None;
        }

        let created_at = match obj.get("created_at") {
            None | Some(Value::Null) => scheduled_at,
            Some(v) => v.as_i64()?,
        };

        let priority = match obj.get("priority") {
            None | Some(Value::Null) => 0,
            Some(v) => v.as_i64()?,
        };

        let payload = match obj.get("payload") {
            None | Some(Value::Null) => Payload::new(),
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Some(_) => return None,
        };

        Some(Job::new(agent_id, payload, scheduled_at, created_at, priority))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            agent_id: self.agent_id.clone(),
            scheduled_at: self.scheduled_at,
            payload_hash: payload_hash(&self.payload),
        }
    }

    /// Read a string hint such as `url` or `method` from the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Whether a unix timestamp falls inside the calendar range timers can be armed for.
pub fn is_representable(timestamp: i64) -> bool {
    DateTime::from_timestamp(timestamp, 0).is_some()
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_payload(payload: &Payload) -> String {
    let canonical: Map<String, Value> = payload
        .iter()
        .map(|(k, v)| (k.clone(), canonicalize(v)))
        .collect();
    serde_json::to_string(&sorted_object(canonical)).unwrap_or_default()
}

pub fn payload_hash(payload: &Payload) -> u64 {
    let mut hasher = DefaultHasher::new();
    canonical_payload(payload).hash(&mut hasher);
    hasher.finish()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => sorted_object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn sorted_object(map: Map<String, Value>) -> Value {
    let sorted: BTreeMap<String, Value> = map.into_iter().collect();
    Value::Object(sorted.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_from_value_defaults() {
        let job = Job::from_value(&json!({"agent_id": "eu1", "scheduled_at": 100})).unwrap();
        assert_eq!(job.created_at, 100);
        assert_eq!(job.priority, 0);
        assert!(job.payload.is_empty());
    }

    #[test]
    fn test_from_value_rejects_malformed() {
        let bad = [
            json!("eu1"),
            json!({"scheduled_at": 100}),
            json!({"agent_id": "  ", "scheduled_at": 100}),
            json!({"agent_id": "eu1"}),
            json!({"agent_id": "eu1", "scheduled_at": "soon"}),
            json!({"agent_id": "eu1", "scheduled_at": 1.5}),
            json!({"agent_id": "eu1", "scheduled_at": 100, "priority": "high"}),
            json!({"agent_id": "eu1", "scheduled_at": 100, "payload": [1, 2]}),
            json!({"agent_id": "eu1", "scheduled_at": 100, "created_at": "yesterday"}),
            json!({"agent_id": "eu1", "scheduled_at": i64::MAX / 2}),
            json!({"agent_id": "eu1", "scheduled_at": i64::MIN}),
        ];
        for value in bad {
            assert!(Job::from_value(&value).is_none(), "accepted {value}");
        }
    }

    #[test]
    fn test_canonical_payload_ignores_key_order() {
        let a = payload(json!({"b": 1, "a": {"y": 2, "x": [ {"k": 1, "j": 2} ]}}));
        let b = payload(json!({"a": {"x": [ {"j": 2, "k": 1} ], "y": 2}, "b": 1}));
        assert_eq!(canonical_payload(&a), canonical_payload(&b));
        assert_eq!(canonical_payload(&a), r#"{"a":{"x":[{"j":2,"k":1}],"y":2},"b":1}"#);
        assert_eq!(payload_hash(&a), payload_hash(&b));

        let c = payload(json!({"b": 2}));
        assert_ne!(payload_hash(&a), payload_hash(&c));
    }

    #[test]
    fn test_dedup_key_and_hints() {
        let job = Job::new("eu1", payload(json!({"url": " https://example.com "})), 10, 5, 0);
        let same = Job::new("eu1", payload(json!({"url": " https://example.com "})), 10, 1, 9);
        assert_eq!(job.dedup_key(), same.dedup_key());
        assert_eq!(job.payload_str("url"), Some("https://example.com"));
        assert_eq!(job.payload_str("method"), None);

        let parsed = Job::from_value(&job.to_value()).unwrap();
        assert_eq!(parsed, job);
    }
}
