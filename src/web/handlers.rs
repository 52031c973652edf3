//! HTTP request handlers.

use super::AppState;
use crate::agents::Agent;
use crate::archive::{
    daily_series, global_window, per_agent_window, per_region_window, AgentWindowMetrics,
    DailyUptime, RegionWindowMetrics, WindowMetrics, DEFAULT_WINDOW_DAYS,
};
use crate::config::MAX_RETENTION_DAYS;
use crate::maintenance::{MaintenanceNotice, WindowListing};
use crate::queue::Payload;
use crate::status::Status;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// API: Queue
// ============================================================================

pub async fn handle_queue_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.queue_health())
}

#[derive(Debug, Deserialize)]
pub struct ScheduleCheckRequest {
    pub agent_id: String,
    #[serde(default)]
    pub payload: Payload,
    /// Unix seconds; defaults to now.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub priority: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleCheckResponse {
    pub accepted: bool,
}

pub async fn handle_schedule_check(
    State(state): State<AppState>,
    Json(req): Json<ScheduleCheckRequest>,
) -> impl IntoResponse {
    let accepted = state.orchestrator.schedule_check(
        req.agent_id.trim(),
        req.payload,
        req.timestamp,
        req.priority,
    );

    let code = if accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (code, Json(ScheduleCheckResponse { accepted }))
}

// ============================================================================
// API: Uptime
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    #[serde(default)]
    pub days: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct UptimeResponse {
    pub days: usize,
    pub global: WindowMetrics,
    pub agents: BTreeMap<String, AgentWindowMetrics>,
    pub regions: BTreeMap<String, RegionWindowMetrics>,
    pub daily: Vec<DailyUptime>,
}

pub async fn handle_uptime(
    State(state): State<AppState>,
    Query(query): Query<UptimeQuery>,
) -> impl IntoResponse {
    let days = query
        .days
        .unwrap_or(DEFAULT_WINDOW_DAYS)
        .clamp(1, MAX_RETENTION_DAYS as usize);

    let archive = state.orchestrator.archive().snapshot();
    let registry = state
        .orchestrator
        .registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone();

    let agents = per_agent_window(&archive, days, Some(&registry));
    let regions = per_region_window(&agents, Some(&registry));

    Json(UptimeResponse {
        days,
        global: global_window(&archive, days, Some(&registry)),
        regions,
        agents,
        daily: daily_series(&archive, days),
    })
}

// ============================================================================
// API: Agents
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub last_status: Option<Status>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

pub async fn handle_get_agents(State(state): State<AppState>) -> impl IntoResponse {
    let latest = state.orchestrator.archive().latest_by_agent();
    let registry = state
        .orchestrator
        .registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone();

    let agents: Vec<AgentView> = registry
        .all()
        .map(|agent| {
            let last = latest.get(&agent.id);
            AgentView {
                agent: agent.clone(),
                last_status: last.map(|e| e.status),
                last_checked_at: last.map(|e| e.timestamp),
            }
        })
        .collect();

    Json(agents)
}

// ============================================================================
// API: Maintenance
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MaintenanceResponse {
    pub windows: Vec<WindowListing>,
    pub notices: Vec<MaintenanceNotice>,
}

pub async fn handle_maintenance(State(state): State<AppState>) -> impl IntoResponse {
    let now = state.orchestrator.clock().now();
    let windows = state
        .orchestrator
        .maintenance()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .list_windows(now);

    Json(MaintenanceResponse {
        windows,
        notices: state.orchestrator.notices().list(),
    })
}

// ============================================================================
// API: Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct KeyUsage {
    pub key: String,
    pub bytes: i64,
    pub size: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub keys: Vec<KeyUsage>,
    pub total_size: String,
    pub archive_days: usize,
    pub recent_entries: usize,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let sizes = match state.store.key_sizes() {
        Ok(sizes) => sizes,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let total: i64 = sizes.iter().map(|(_, bytes)| bytes).sum();

    let keys = sizes
        .into_iter()
        .map(|(key, bytes)| KeyUsage {
            key,
            bytes,
            size: format_bytes(bytes),
        })
        .collect();

    Json(StatusResponse {
        keys,
        total_size: format_bytes(total),
        archive_days: state.orchestrator.archive().snapshot().len(),
        recent_entries: state.orchestrator.archive().recent().len(),
    })
    .into_response()
}

fn format_bytes(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
