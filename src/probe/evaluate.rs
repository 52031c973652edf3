//! Classifying a probe response into a status.

use chrono::{DateTime, Utc};
use regex::RegexBuilder;

use super::{expected_keyword, ProbeResponse};
use crate::agents::Agent;
use crate::queue::Job;
use crate::status::{ProbeEntry, Status};

pub const VIOLATION_LATENCY: &str = "latency";
pub const VIOLATION_KEYWORD: &str = "keyword";

/// Decides the latency limit for an agent. `None` disables the check.
pub trait ThresholdPolicy: Send + Sync {
    fn latency_threshold(&self, agent: &Agent) -> Option<f64>;
}

/// One limit for every agent; zero or less disables it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticThresholds {
    pub latency_seconds: f64,
}

impl ThresholdPolicy for StaticThresholds {
    fn latency_threshold(&self, _agent: &Agent) -> Option<f64> {
        (self.latency_seconds.is_finite() && self.latency_seconds > 0.0).then_some(self.latency_seconds)
    }
}

/// Build the entry for one response.
pub fn evaluate(
    agent: &Agent,
    job: &Job,
    response: &ProbeResponse,
    thresholds: &dyn ThresholdPolicy,
    now: DateTime<Utc>,
) -> ProbeEntry {
    let mut entry = ProbeEntry::new(now, &agent.id, Status::Unknown);

    if let Some(error) = &response.error {
        entry.error = Some(error.clone());
        return entry;
    }
    let Some(code) = response.http_status else {
        entry.error = Some("no response".to_string());
        return entry;
    };

    entry.latency_seconds = response.latency_seconds;
    entry.ttfb_seconds = response.ttfb_seconds;

    if !(200..400).contains(&code) {
        entry.status = Status::Down;
        entry.error = Some(format!("http status {}", code));
        return entry;
    }

    if let (Some(limit), Some(latency)) = (thresholds.latency_threshold(agent), response.latency_seconds) {
        if latency > limit {
            entry.violation_types.push(VIOLATION_LATENCY.to_string());
        }
    }
    if let Some(keyword) = expected_keyword(job, agent) {
        if !contains_keyword(&response.body, keyword) {
            entry.violation_types.push(VIOLATION_KEYWORD.to_string());
        }
    }

    entry.status = if entry.violation_types.is_empty() {
        Status::Up
    } else {
        Status::Down
    };
    entry
}

/// Case-insensitive literal match.
pub fn contains_keyword(body: &str, keyword: &str) -> bool {
    match RegexBuilder::new(&regex::escape(keyword))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.is_match(body),
        Err(_) => body.to_lowercase().contains(&keyword.to_lowercase()),
    }
}
