//! Turning a queued job into a concrete HTTP request.

use serde_json::Value;
use std::time::Duration;

use super::{ProbeError, ProbeRequest};
use crate::agents::Agent;
use crate::config::ServerConfig;
use crate::queue::Job;

/// Fallbacks used when neither the job nor the agent says otherwise.
#[derive(Debug, Clone)]
pub struct ProbeDefaults {
    pub target_url: Option<String>,
    pub timeout: Duration,
}

impl Default for ProbeDefaults {
    fn default() -> Self {
        Self {
            target_url: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ServerConfig> for ProbeDefaults {
    fn from(config: &ServerConfig) -> Self {
        Self {
            target_url: config.target_url.clone(),
            timeout: Duration::try_from_secs_f64(config.probe_timeout_secs)
                .ok()
                .filter(|t| !t.is_zero())
                .unwrap_or(Duration::from_secs(10)),
        }
    }
}

/// Payload hints win over agent overrides, which win over the defaults.
pub fn resolve_request(
    job: &Job,
    agent: &Agent,
    defaults: &ProbeDefaults,
) -> Result<ProbeRequest, ProbeError> {
    let url = job
        .payload_str("url")
        .or(agent.http.url.as_deref().map(str::trim).filter(|u| !u.is_empty()))
        .or(defaults.target_url.as_deref().map(str::trim).filter(|u| !u.is_empty()))
        .ok_or_else(|| ProbeError::Config(format!("no target url for agent {}", agent.id)))?;

    let method = job
        .payload_str("method")
        .or(agent.http.method.as_deref().map(str::trim).filter(|m| !m.is_empty()))
        .unwrap_or("GET")
        .to_ascii_uppercase();

    let mut headers = agent.http.headers.clone();
    if let Some(Value::Object(extra)) = job.payload.get("headers") {
        for (name, value) in extra {
            if let Some(value) = value.as_str() {
                headers.insert(name.clone(), value.to_string());
            }
        }
    }

    let timeout = agent
        .http
        .timeout_seconds
        .and_then(|t| Duration::try_from_secs_f64(t).ok())
        .filter(|t| !t.is_zero())
        .unwrap_or(defaults.timeout);

    Ok(ProbeRequest {
        url: with_scheme(url),
        method,
        headers,
        timeout,
    })
}

/// Keyword the body must contain: the job's hint, else the agent's.
pub fn expected_keyword<'a>(job: &'a Job, agent: &'a Agent) -> Option<&'a str> {
    job.payload_str("keyword").or(agent
        .http
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty()))
}

fn with_scheme(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}
