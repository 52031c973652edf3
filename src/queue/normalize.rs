//! Pure normalization pass over the persisted queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::job::{DedupKey, Job};

pub const DEFAULT_QUEUE_MAX_SIZE: usize = 200;
pub const DEFAULT_QUEUE_TTL_SECS: i64 = 86_400;

/// Bounds applied on every pass. Zero disables a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueLimits {
    pub max_size: usize,
    pub ttl_secs: i64,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_QUEUE_MAX_SIZE,
            ttl_secs: DEFAULT_QUEUE_TTL_SECS,
        }
    }
}

/// Counters from the latest normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueMetrics {
    pub recorded_at: i64,
    pub requested: usize,
    pub retained: usize,
    pub dropped_invalid: usize,
    pub dropped_expired: usize,
    pub dropped_duplicates: usize,
    pub dropped_overflow: usize,
    pub queue_length: usize,
    pub delayed_jobs: usize,
    pub max_wait_seconds: i64,
    pub avg_wait_seconds: f64,
    pub prioritized_jobs: usize,
    pub min_priority: Option<i64>,
    pub max_priority: Option<i64>,
    pub avg_priority: Option<f64>,
    pub next_scheduled_at: Option<i64>,
    pub oldest_created_at: Option<i64>,
    pub max_size: usize,
    pub ttl_secs: i64,
}

/// Output of one pass: the ordered queue and what happened to the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub jobs: Vec<Job>,
    pub metrics: QueueMetrics,
}

/// Validate, expire, merge, order and bound a raw queue.
///
/// Never fails: anything that cannot be kept is dropped and counted.
pub fn normalize<I>(raw: I, now: i64, limits: QueueLimits) -> Normalized
where
    I: IntoIterator<Item = Value>,
{
    let mut metrics = QueueMetrics {
        recorded_at: now,
        max_size: limits.max_size,
        ttl_secs: limits.ttl_secs,
        ..Default::default()
    };

    // Validate and expire
    let mut live: Vec<Job> = Vec::new();
    for value in raw {
        metrics.requested += 1;
        let job = match Job::from_value(&value) {
            Some(job) => job,
            None => {
                metrics.dropped_invalid += 1;
                continue;
            }
        };
        if is_expired(&job, now, limits.ttl_secs) {
            metrics.dropped_expired += 1;
            continue;
        }
        live.push(job);
    }

    // Merge duplicates
    let mut index: HashMap<DedupKey, usize> = HashMap::with_capacity(live.len());
    let mut merged: Vec<(DedupKey, Job)> = Vec::with_capacity(live.len());
    for job in live {
        let key = job.dedup_key();
        match index.get(&key) {
            Some(&slot) => {
                let kept = &mut merged[slot].1;
                kept.created_at = kept.created_at.min(job.created_at);
                kept.scheduled_at = kept.scheduled_at.min(job.scheduled_at);
                kept.priority = kept.priority.max(job.priority);
                metrics.dropped_duplicates += 1;
            }
            None => {
                index.insert(key.clone(), merged.len());
                merged.push((key, job));
            }
        }
    }

    merged.sort_by(|(ka, a), (kb, b)| queue_order(a, b).then_with(|| ka.cmp(kb)));

    if limits.max_size > 0 && merged.len() > limits.max_size {
        metrics.dropped_overflow = merged.len() - limits.max_size;
        merged.truncate(limits.max_size);
    }

    let jobs: Vec<Job> = merged.into_iter().map(|(_, job)| job).collect();
    fill_stats(&mut metrics, &jobs, now);

    Normalized { jobs, metrics }
}

/// Normalize an already-typed queue.
pub fn normalize_jobs(jobs: &[Job], now: i64, limits: QueueLimits) -> Normalized {
    normalize(jobs.iter().map(Job::to_value), now, limits)
}

fn is_expired(job: &Job, now: i64, ttl_secs: i64) -> bool {
    ttl_secs > 0 && job.scheduled_at <= now.saturating_sub(ttl_secs)
}

/// Higher priority first, then earliest scheduled, then earliest created.
fn queue_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.scheduled_at.cmp(&b.scheduled_at))
        .then(a.created_at.cmp(&b.created_at))
}

fn fill_stats(metrics: &mut QueueMetrics, jobs: &[Job], now: i64) {
    metrics.retained = jobs.len();
    metrics.queue_length = jobs.len();

    let waits: Vec<i64> = jobs
        .iter()
        .filter(|j| j.scheduled_at < now)
        .map(|j| now.saturating_sub(j.scheduled_at))
        .collect();
    metrics.delayed_jobs = waits.len();
    metrics.max_wait_seconds = waits.iter().copied().max().unwrap_or(0);
    metrics.avg_wait_seconds = mean(&waits).unwrap_or(0.0);

    let priorities: Vec<i64> = jobs
        .iter()
        .map(|j| j.priority)
        .filter(|p| *p > 0)
        .collect();
    metrics.prioritized_jobs = priorities.len();
    metrics.min_priority = priorities.iter().copied().min();
    metrics.max_priority = priorities.iter().copied().max();
    metrics.avg_priority = mean(&priorities);

    metrics.next_scheduled_at = jobs.iter().map(|j| j.scheduled_at).min();
    metrics.oldest_created_at = jobs.iter().map(|j| j.created_at).min();
}

/// Summed in i128 so extreme values cannot overflow.
fn mean(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: i128 = values.iter().map(|v| *v as i128).sum();
    Some(sum as f64 / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn job(agent: &str, scheduled_at: i64, priority: i64) -> Value {
        json!({
            "agent_id": agent,
            "payload": {},
            "scheduled_at": scheduled_at,
            "created_at": scheduled_at,
            "priority": priority,
        })
    }

    #[test]
    fn test_dedup_keeps_highest_priority() {
        let out = normalize(vec![job("eu1", NOW, 0), job("eu1", NOW, 5)], NOW, QueueLimits::default());
        assert_eq!(out.jobs.len(), 1);
        assert_eq!(out.jobs[0].priority, 5);
        assert_eq!(out.metrics.dropped_duplicates, 1);
        assert_eq!(out.metrics.requested, 2);
        assert_eq!(out.metrics.retained, 1);
    }

    #[test]
    fn test_dedup_merges_created_at() {
        let mut first = job("eu1", NOW + 60, 1);
        first["created_at"] = json!(NOW - 10);
        let mut second = job("eu1", NOW + 60, 0);
        second["created_at"] = json!(NOW - 30);
        let out = normalize(vec![first, second], NOW, QueueLimits::default());
        assert_eq!(out.jobs.len(), 1);
        assert_eq!(out.jobs[0].created_at, NOW - 30);
        assert_eq!(out.jobs[0].priority, 1);
    }

    #[test]
    fn test_different_payloads_are_distinct() {
        let mut a = job("eu1", NOW, 0);
        a["payload"] = json!({"url": "https://a.example"});
        let mut b = job("eu1", NOW, 0);
        b["payload"] = json!({"url": "https://b.example"});
        let out = normalize(vec![a, b], NOW, QueueLimits::default());
        assert_eq!(out.jobs.len(), 2);
        assert_eq!(out.metrics.dropped_duplicates, 0);
    }

    #[test]
    fn test_ttl_boundary() {
        let limits = QueueLimits { max_size: 0, ttl_secs: 3600 };
        let out = normalize(
            vec![job("eu1", NOW - 3600 - 1, 0), job("eu1", NOW - 3600 + 1, 0)],
            NOW,
            limits,
        );
        assert_eq!(out.metrics.dropped_expired, 1);
        assert_eq!(out.jobs.len(), 1);
        assert_eq!(out.jobs[0].scheduled_at, NOW - 3599);

        // Exactly now - ttl is expired too
        let out = normalize(vec![job("eu1", NOW - 3600, 0)], NOW, limits);
        assert_eq!(out.metrics.dropped_expired, 1);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let limits = QueueLimits { max_size: 0, ttl_secs: 0 };
        let out = normalize(vec![job("eu1", 1, 0)], NOW, limits);
        assert_eq!(out.jobs.len(), 1);
        assert_eq!(out.metrics.dropped_expired, 0);
    }

    #[test]
    fn test_overflow_keeps_best_jobs() {
        let limits = QueueLimits { max_size: 3, ttl_secs: 0 };
        let raw = vec![
            job("a", NOW + 50, 0),
            job("b", NOW + 10, 0),
            job("c", NOW + 40, 7),
            job("d", NOW + 20, 0),
            job("e", NOW + 30, 0),
        ];
        let out = normalize(raw, NOW, limits);
        assert_eq!(out.metrics.dropped_overflow, 2);
        let agents: Vec<&str> = out.jobs.iter().map(|j| j.agent_id.as_str()).collect();
        assert_eq!(agents, vec!["c", "b", "d"]);
    }

    #[test]
    fn test_unlimited_size() {
        let limits = QueueLimits { max_size: 0, ttl_secs: 0 };
        let raw: Vec<Value> = (0..500).map(|i| job("eu1", NOW + i, 0)).collect();
        let out = normalize(raw, NOW, limits);
        assert_eq!(out.jobs.len(), 500);
        assert_eq!(out.metrics.dropped_overflow, 0);
    }

    #[test]
    fn test_invalid_entries_counted() {
        let raw = vec![json!(null), json!({"agent_id": "eu1"}), job("eu1", NOW, 0)];
        let out = normalize(raw, NOW, QueueLimits::default());
        assert_eq!(out.metrics.requested, 3);
        assert_eq!(out.metrics.dropped_invalid, 2);
        assert_eq!(out.jobs.len(), 1);
    }

    #[test]
    fn test_order_priority_then_schedule_then_created() {
        let mut early_created = job("x", NOW + 100, 1);
        early_created["created_at"] = json!(NOW - 50);
        early_created["payload"] = json!({"n": 1});
        let mut late_created = job("x", NOW + 100, 1);
        late_created["created_at"] = json!(NOW - 10);
        late_created["payload"] = json!({"n": 2});

        let raw = vec![
            late_created,
            job("y", NOW + 10, 0),
            early_created,
            job("z", NOW + 50, 1),
        ];
        let out = normalize(raw, NOW, QueueLimits::default());
        let order: Vec<(String, i64)> = out
            .jobs
            .iter()
            .map(|j| (j.agent_id.clone(), j.created_at))
            .collect();
        assert_eq!(
            order,
            vec![
                ("z".to_string(), NOW + 50),
                ("x".to_string(), NOW - 50),
                ("x".to_string(), NOW - 10),
                ("y".to_string(), NOW + 10),
            ]
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let limits = QueueLimits { max_size: 4, ttl_secs: 600 };
        let mut with_payload = job("eu1", NOW - 20, 3);
        with_payload["payload"] = json!({"b": [1, {"z": 1, "a": 2}], "a": "x"});
        let raw = vec![
            job("eu1", NOW - 20, 0),
            with_payload,
            job("eu1", NOW - 20, 2),
            job("us1", NOW - 700, 9),
            job("us1", NOW + 5, 1),
            json!({"garbage": true}),
            job("ap1", NOW + 5, 1),
            job("ap2", NOW + 500, 0),
            job("ap3", NOW + 900, 0),
        ];
        let once = normalize(raw, NOW, limits);
        let twice = normalize_jobs(&once.jobs, NOW, limits);
        assert_eq!(once.jobs, twice.jobs);
        assert_eq!(twice.metrics.dropped_duplicates, 0);
        assert_eq!(twice.metrics.dropped_overflow, 0);
        assert_eq!(twice.metrics.dropped_expired, 0);
        assert_eq!(twice.metrics.dropped_invalid, 0);
    }

    #[test]
    fn test_stats() {
        let mut raw = vec![
            job("a", NOW - 100, 0),
            job("b", NOW - 20, 4),
            job("c", NOW + 30, 2),
        ];
        raw[2]["created_at"] = json!(NOW - 500);
        let out = normalize(raw, NOW, QueueLimits::default());
        let m = &out.metrics;
        assert_eq!(m.queue_length, 3);
        assert_eq!(m.delayed_jobs, 2);
        assert_eq!(m.max_wait_seconds, 100);
        assert_eq!(m.avg_wait_seconds, 60.0);
        assert_eq!(m.prioritized_jobs, 2);
        assert_eq!(m.min_priority, Some(2));
        assert_eq!(m.max_priority, Some(4));
        assert_eq!(m.avg_priority, Some(3.0));
        assert_eq!(m.next_scheduled_at, Some(NOW - 100));
        assert_eq!(m.oldest_created_at, Some(NOW - 500));
        assert_eq!(m.recorded_at, NOW);
    }

    #[test]
    fn test_extreme_priorities_do_not_overflow() {
        let raw = vec![job("a", NOW + 10, i64::MAX), job("b", NOW + 10, i64::MAX), job("c", NOW + 10, 1)];
        let out = normalize(raw, NOW, QueueLimits::default());
        let m = &out.metrics;
        assert_eq!(m.prioritized_jobs, 3);
        assert_eq!(m.max_priority, Some(i64::MAX));
        assert_eq!(m.min_priority, Some(1));
        let avg = m.avg_priority.unwrap();
        assert!(avg > 6.0e18 && avg.is_finite());
        assert_eq!(out.jobs[2].agent_id, "c");

        // Stats of a second pass over the same queue are stable
        let again = normalize_jobs(&out.jobs, NOW, QueueLimits::default());
        assert_eq!(again.metrics.avg_priority, m.avg_priority);
    }

    #[test]
    fn test_distant_past_without_ttl_does_not_overflow() {
        let limits = QueueLimits { max_size: 0, ttl_secs: 0 };
        let far = -8_000_000_000_000;
        let out = normalize(vec![job("a", far, 0), job("b", far, 0), job("c", NOW, 0)], NOW, limits);
        let m = &out.metrics;
        assert_eq!(m.queue_length, 3);
        assert_eq!(m.delayed_jobs, 2);
        assert_eq!(m.max_wait_seconds, NOW - far);
        assert_eq!(m.avg_wait_seconds, (NOW - far) as f64);
    }

    #[test]
    fn test_unrepresentable_schedule_is_invalid() {
        let limits = QueueLimits { max_size: 0, ttl_secs: 0 };
        let raw = vec![
            job("a", i64::MIN, 0),
            job("b", i64::MAX / 2, 0),
            job("c", NOW, 0),
        ];
        let out = normalize(raw, NOW, limits);
        assert_eq!(out.metrics.dropped_invalid, 2);
        assert_eq!(out.jobs.len(), 1);
        assert_eq!(out.metrics.next_scheduled_at, Some(NOW));
    }

    #[test]
    fn test_empty_queue() {
        let out = normalize(Vec::<Value>::new(), NOW, QueueLimits::default());
        assert!(out.jobs.is_empty());
        assert_eq!(out.metrics.next_scheduled_at, None);
        assert_eq!(out.metrics.avg_priority, None);
    }
}
