//! Uptime and latency over the trailing window of archived days.
//!
//! When the registry carries active agents with a positive weight, global and
//! regional figures are the weight-averaged per-agent figures. Otherwise they
//! fall back to plain ratios over the summed counters.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use super::daily::{Counters, DailyArchive};
use crate::agents::{AgentRegistry, DEFAULT_REGION};

pub const DEFAULT_WINDOW_DAYS: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowMetrics {
    pub days: usize,
    /// Checks outside maintenance.
    pub total_checks: u64,
    pub up: u64,
    pub down: u64,
    pub unknown: u64,
    pub maintenance: u64,
    pub violations: u64,
    pub uptime: f64,
    pub avg_latency: Option<f64>,
    pub avg_ttfb: Option<f64>,
    pub weighted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentWindowMetrics {
    pub agent_id: String,
    pub label: String,
    pub region: String,
    pub weight: f64,
    pub total_checks: u64,
    pub uptime: f64,
    pub avg_latency: Option<f64>,
    pub avg_ttfb: Option<f64>,
    pub counters: Counters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionWindowMetrics {
    pub region: String,
    pub agents: Vec<String>,
    pub total_checks: u64,
    pub uptime: f64,
    pub avg_latency: Option<f64>,
    pub avg_ttfb: Option<f64>,
    pub weighted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyUptime {
    pub date: NaiveDate,
    pub uptime: f64,
    pub total_checks: u64,
}

struct Blended {
    uptime: f64,
    avg_latency: Option<f64>,
    avg_ttfb: Option<f64>,
}

/// Weight-average per-agent figures. `None` when no agent carries weight.
fn blend<'a>(agents: impl Iterator<Item = &'a AgentWindowMetrics>) -> Option<Blended> {
    let mut weight_sum = 0.0;
    let mut uptime = 0.0;
    let (mut latency, mut latency_weight) = (0.0, 0.0);
    let (mut ttfb, mut ttfb_weight) = (0.0, 0.0);

    for agent in agents.filter(|a| a.weight > 0.0) {
        weight_sum += agent.weight;
        uptime += agent.weight * agent.uptime;
        if let Some(l) = agent.avg_latency {
            latency += agent.weight * l;
            latency_weight += agent.weight;
        }
        if let Some(t) = agent.avg_ttfb {
            ttfb += agent.weight * t;
            ttfb_weight += agent.weight;
        }
    }

    if weight_sum <= 0.0 {
        return None;
    }
    Some(Blended {
        uptime: uptime / weight_sum,
        avg_latency: (latency_weight > 0.0).then(|| latency / latency_weight),
        avg_ttfb: (ttfb_weight > 0.0).then(|| ttfb / ttfb_weight),
    })
}

fn window_totals(archive: &DailyArchive, days: usize) -> Counters {
    let mut totals = Counters::default();
    for (_, record) in archive.last_days(days) {
        totals.merge(&record.totals);
    }
    totals
}

/// Fleet-wide figures over the last `days` records.
pub fn global_window(
    archive: &DailyArchive,
    days: usize,
    registry: Option<&AgentRegistry>,
) -> WindowMetrics {
    let totals = window_totals(archive, days);

    let blended = registry.and_then(|registry| {
        let per_agent = per_agent_window(archive, days, Some(registry));
        blend(per_agent.values())
    });

    let (uptime, avg_latency, avg_ttfb, weighted) = match blended {
        Some(b) => (b.uptime, b.avg_latency, b.avg_ttfb, true),
        None => (totals.uptime(), totals.avg_latency(), totals.avg_ttfb(), false),
    };

    WindowMetrics {
        days,
        total_checks: totals.effective_total(),
        up: totals.up,
        down: totals.down,
        unknown: totals.unknown,
        maintenance: totals.maintenance,
        violations: totals.violations,
        uptime,
        avg_latency,
        avg_ttfb,
        weighted,
    }
}

/// Per-agent figures. With a registry, inactive agents are left out and
/// labels, regions and weights come from it; without one every agent in
/// the archive is reported with weight 0.
pub fn per_agent_window(
    archive: &DailyArchive,
    days: usize,
    registry: Option<&AgentRegistry>,
) -> BTreeMap<String, AgentWindowMetrics> {
    let mut summed: BTreeMap<String, Counters> = BTreeMap::new();
    for (_, record) in archive.last_days(days) {
        for (agent_id, counters) in &record.agents {
            summed.entry(agent_id.clone()).or_default().merge(counters);
        }
    }

    let mut out = BTreeMap::new();
    for (agent_id, counters) in summed {
        let (label, region, weight) = match registry {
            Some(registry) => match registry.get(&agent_id) {
                Some(agent) if !agent.active => continue,
                Some(agent) => (agent.label.clone(), agent.region.clone(), agent.effective_weight()),
                None => (agent_id.clone(), DEFAULT_REGION.to_string(), 0.0),
            },
            None => (agent_id.clone(), DEFAULT_REGION.to_string(), 0.0),
        };
        out.insert(
            agent_id.clone(),
            AgentWindowMetrics {
                agent_id,
                label,
                region,
                weight,
                total_checks: counters.effective_total(),
                uptime: counters.uptime(),
                avg_latency: counters.avg_latency(),
                avg_ttfb: counters.avg_ttfb(),
                counters,
            },
        );
    }
    out
}

/// Group per-agent figures by region and blend them again one level up.
pub fn per_region_window(
    per_agent: &BTreeMap<String, AgentWindowMetrics>,
    registry: Option<&AgentRegistry>,
) -> BTreeMap<String, RegionWindowMetrics> {
    let mut groups: BTreeMap<String, Vec<AgentWindowMetrics>> = BTreeMap::new();
    for metrics in per_agent.values() {
        let mut metrics = metrics.clone();
        if let Some(agent) = registry.and_then(|r| r.get(&metrics.agent_id)) {
            metrics.region = agent.region.clone();
            metrics.weight = agent.effective_weight();
        }
        groups.entry(metrics.region.clone()).or_default().push(metrics);
    }

    groups
        .into_iter()
        .map(|(region, members)| {
            let mut totals = Counters::default();
            for m in &members {
                totals.merge(&m.counters);
            }
            let (uptime, avg_latency, avg_ttfb, weighted) = match blend(members.iter()) {
                Some(b) => (b.uptime, b.avg_latency, b.avg_ttfb, true),
                None => (totals.uptime(), totals.avg_latency(), totals.avg_ttfb(), false),
            };
            let metrics = RegionWindowMetrics {
                region: region.clone(),
                agents: members.into_iter().map(|m| m.agent_id).collect(),
                total_checks: totals.effective_total(),
                uptime,
                avg_latency,
                avg_ttfb,
                weighted,
            };
            (region, metrics)
        })
        .collect()
}

/// Uptime per day, oldest first.
pub fn daily_series(archive: &DailyArchive, days: usize) -> Vec<DailyUptime> {
    archive
        .last_days(days)
        .into_iter()
        .map(|(date, record)| DailyUptime {
            date,
            uptime: record.totals.uptime(),
            total_checks: record.totals.effective_total(),
        })
        .collect()
}
