//! Fire-and-forget hooks for dashboards and metric sinks.

use chrono::{DateTime, Utc};

use crate::queue::QueueMetrics;

pub trait Observer: Send + Sync {
    fn on_queue_metrics_recorded(&self, _snapshot: &QueueMetrics) {}
    fn on_maintenance_notice_recorded(&self, _message: &str, _timestamp: DateTime<Utc>) {}
}

/// Default observer: writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_queue_metrics_recorded(&self, snapshot: &QueueMetrics) {
        tracing::debug!(
            "RemoteJobQueue: length={} delayed={} dropped invalid={} expired={} duplicates={} overflow={}",
            snapshot.queue_length,
            snapshot.delayed_jobs,
            snapshot.dropped_invalid,
            snapshot.dropped_expired,
            snapshot.dropped_duplicates,
            snapshot.dropped_overflow
        );
    }

    fn on_maintenance_notice_recorded(&self, message: &str, timestamp: DateTime<Utc>) {
        tracing::info!("Maintenance: {} at {}", message, timestamp.to_rfc3339());
    }
}
