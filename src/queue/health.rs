//! Queue health analysis.
//!
//! Turns the counters from the latest normalization pass into a status and
//! a list of alerts. Pure: the caller supplies the snapshot and the time.

use serde::{Deserialize, Serialize};

use super::normalize::QueueMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueAlert {
    pub severity: AlertSeverity,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueHealth {
    pub status: HealthStatus,
    pub alerts: Vec<QueueAlert>,
}

/// Alert thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueHealthThresholds {
    /// Fraction of the size bound at which the backlog is a warning.
    pub backlog_warning_ratio: f64,
    pub wait_warning_secs: i64,
    pub wait_critical_secs: i64,
    /// Snapshot age after which a non-empty queue looks stuck.
    pub stale_after_secs: i64,
}

impl Default for QueueHealthThresholds {
    fn default() -> Self {
        Self {
            backlog_warning_ratio: 0.8,
            wait_warning_secs: 300,
            wait_critical_secs: 1800,
            stale_after_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueHealthAnalyzer {
    thresholds: QueueHealthThresholds,
}

impl QueueHealthAnalyzer {
    pub fn new(thresholds: QueueHealthThresholds) -> Self {
        Self { thresholds }
    }

    pub fn analyze(&self, metrics: &QueueMetrics, now: i64) -> QueueHealth {
        let t = &self.thresholds;
        let mut alerts = Vec::new();

        if metrics.max_size > 0 {
            let max = metrics.max_size as f64;
            let length = metrics.queue_length as f64;
            if length >= max {
                alerts.push(alert(
                    AlertSeverity::Critical,
                    "backlog_full",
                    format!("queue is full ({} of {})", metrics.queue_length, metrics.max_size),
                ));
            } else if length >= max * t.backlog_warning_ratio {
                alerts.push(alert(
                    AlertSeverity::Warning,
                    "backlog_high",
                    format!(
                        "queue is at {:.0}% of capacity ({} of {})",
                        length / max * 100.0,
                        metrics.queue_length,
                        metrics.max_size
                    ),
                ));
            }
        }

        if metrics.dropped_overflow > 0 {
            alerts.push(alert(
                AlertSeverity::Warning,
                "overflow",
                format!("{} jobs evicted by the size limit", metrics.dropped_overflow),
            ));
        }
        if metrics.dropped_expired > 0 {
            alerts.push(alert(
                AlertSeverity::Warning,
                "expired",
                format!("{} jobs expired before running", metrics.dropped_expired),
            ));
        }
        if metrics.dropped_invalid > 0 {
            alerts.push(alert(
                AlertSeverity::Warning,
                "invalid",
                format!("{} malformed jobs dropped", metrics.dropped_invalid),
            ));
        }

        if metrics.max_wait_seconds >= t.wait_critical_secs {
            alerts.push(alert(
                AlertSeverity::Critical,
                "wait_critical",
                format!("oldest due job has waited {}s", metrics.max_wait_seconds),
            ));
        } else if metrics.max_wait_seconds >= t.wait_warning_secs {
            alerts.push(alert(
                AlertSeverity::Warning,
                "wait_high",
                format!("oldest due job has waited {}s", metrics.max_wait_seconds),
            ));
        }

        let age = now - metrics.recorded_at;
        if metrics.queue_length > 0 && age > t.stale_after_secs {
            alerts.push(alert(
                AlertSeverity::Warning,
                "stale_snapshot",
                format!("no queue activity for {}s", age),
            ));
        }

        let status = match alerts.iter().map(|a| a.severity).max() {
            Some(AlertSeverity::Critical) => HealthStatus::Critical,
            Some(AlertSeverity::Warning) => HealthStatus::Warning,
            None => HealthStatus::Healthy,
        };

        QueueHealth { status, alerts }
    }
}

fn alert(severity: AlertSeverity, code: &str, message: String) -> QueueAlert {
    QueueAlert {
        severity,
        code: code.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn metrics() -> QueueMetrics {
        QueueMetrics {
            recorded_at: NOW,
            max_size: 200,
            ttl_secs: 86_400,
            ..Default::default()
        }
    }

    fn codes(health: &QueueHealth) -> Vec<&str> {
        health.alerts.iter().map(|a| a.code.as_str()).collect()
    }

    #[test]
    fn test_empty_queue_is_healthy() {
        let health = QueueHealthAnalyzer::default().analyze(&metrics(), NOW);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.alerts.is_empty());
    }

    #[test]
    fn test_backlog_levels() {
        let analyzer = QueueHealthAnalyzer::default();

        let mut m = metrics();
        m.queue_length = 160;
        let health = analyzer.analyze(&m, NOW);
        assert_eq!(health.status, HealthStatus::Warning);
        assert_eq!(codes(&health), vec!["backlog_high"]);

        m.queue_length = 200;
        let health = analyzer.analyze(&m, NOW);
        assert_eq!(health.status, HealthStatus::Critical);
        assert_eq!(codes(&health), vec!["backlog_full"]);

        m.max_size = 0;
        m.queue_length = 10_000;
        assert_eq!(analyzer.analyze(&m, NOW).status, HealthStatus::Healthy);
    }

    #[test]
    fn test_drop_counters_warn() {
        let mut m = metrics();
        m.dropped_overflow = 2;
        m.dropped_expired = 1;
        m.dropped_invalid = 3;
        m.dropped_duplicates = 9;
        let health = QueueHealthAnalyzer::default().analyze(&m, NOW);
        assert_eq!(health.status, HealthStatus::Warning);
        assert_eq!(codes(&health), vec!["overflow", "expired", "invalid"]);
    }

    #[test]
    fn test_wait_escalates() {
        let analyzer = QueueHealthAnalyzer::default();
        let mut m = metrics();
        m.queue_length = 1;
        m.max_wait_seconds = 300;
        assert_eq!(codes(&analyzer.analyze(&m, NOW)), vec!["wait_high"]);

        m.max_wait_seconds = 1800;
        let health = analyzer.analyze(&m, NOW);
        assert_eq!(health.status, HealthStatus::Critical);
        assert_eq!(codes(&health), vec!["wait_critical"]);
    }

    #[test]
    fn test_stale_snapshot_only_matters_with_jobs() {
        let analyzer = QueueHealthAnalyzer::new(QueueHealthThresholds {
            stale_after_secs: 60,
            ..Default::default()
        });
        let mut m = metrics();
        assert!(analyzer.analyze(&m, NOW + 600).alerts.is_empty());

        m.queue_length = 2;
        assert_eq!(codes(&analyzer.analyze(&m, NOW + 600)), vec!["stale_snapshot"]);
    }
}
