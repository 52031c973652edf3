//! Scheduler module: per-agent check timers, the drain wake-up and the
//! archive writer.

mod timers;
mod writer;

pub use timers::*;
pub use writer::*;

use crate::agents::{Agent, SharedRegistry};
use crate::archive::ArchiveService;
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::maintenance::{MaintenanceNotice, MaintenanceResolver, NoticeLog};
use crate::probe::{
    evaluate, resolve_request, FailureTracker, ProbeDefaults, Prober, ThresholdPolicy,
};
use crate::queue::{
    HealthStatus, Job, Payload, QueueAlert, QueueHealthAnalyzer, QueueMetrics, RemoteJobQueue,
};
use crate::status::{ProbeEntry, Status};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

/// Knobs taken from the server configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub check_interval: Duration,
    pub probe_defaults: ProbeDefaults,
    pub failure_alert_threshold: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            probe_defaults: ProbeDefaults::default(),
            failure_alert_threshold: 3,
        }
    }
}

impl From<&ServerConfig> for OrchestratorSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(config.probe_interval_secs.max(1)),
            probe_defaults: ProbeDefaults::from(config),
            failure_alert_threshold: config.failure_alert_threshold,
        }
    }
}

/// Everything the orchestrator coordinates.
pub struct OrchestratorParts<P: Prober> {
    pub queue: Arc<RemoteJobQueue>,
    pub registry: SharedRegistry,
    pub maintenance: Arc<RwLock<MaintenanceResolver>>,
    pub notices: Arc<NoticeLog>,
    pub archive: Arc<ArchiveService>,
    pub prober: Arc<P>,
    pub thresholds: Arc<dyn ThresholdPolicy>,
    pub timers: Arc<dyn Timers>,
    pub clock: Arc<dyn Clock>,
    pub settings: OrchestratorSettings,
}

#[derive(Debug, Clone, Copy)]
struct PendingWakeup {
    at: i64,
    handle: TimerHandle,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub probed: usize,
    pub discarded: usize,
    pub entries: Vec<ProbeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSchedule {
    pub next_wakeup_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueHealthReport {
    pub metrics: QueueMetrics,
    pub status: HealthStatus,
    pub alerts: Vec<QueueAlert>,
    pub schedule: QueueSchedule,
}

/// Drives the queue: arms timers, drains due jobs through the prober and
/// hands results to the archive writer.
pub struct Orchestrator<P: Prober> {
    queue: Arc<RemoteJobQueue>,
    registry: SharedRegistry,
    maintenance: Arc<RwLock<MaintenanceResolver>>,
    notices: Arc<NoticeLog>,
    archive: Arc<ArchiveService>,
    archive_tx: mpsc::Sender<ArchiveCommand>,
    prober: Arc<P>,
    thresholds: Arc<dyn ThresholdPolicy>,
    tracker: Mutex<FailureTracker>,
    analyzer: QueueHealthAnalyzer,
    timers: Arc<dyn Timers>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
    wakeup: Mutex<Option<PendingWakeup>>,
    recurring: Mutex<Vec<TimerHandle>>,
}

impl<P: Prober> Orchestrator<P> {
    /// Build the orchestrator and start its archive writer.
    pub fn new(parts: OrchestratorParts<P>) -> Arc<Self> {
        // The writer exits once the last sender, held here, is dropped
        let (archive_tx, _) = spawn_archive_writer(parts.archive.clone());

        Arc::new(Self {
            queue: parts.queue,
            registry: parts.registry,
            maintenance: parts.maintenance,
            notices: parts.notices,
            archive: parts.archive,
            archive_tx,
            prober: parts.prober,
            thresholds: parts.thresholds,
            tracker: Mutex::new(FailureTracker::new(parts.settings.failure_alert_threshold)),
            analyzer: QueueHealthAnalyzer::default(),
            timers: parts.timers,
            clock: parts.clock,
            settings: parts.settings,
            wakeup: Mutex::new(None),
            recurring: Mutex::new(Vec::new()),
        })
    }

    /// Register a recurring check for every active agent and arm the
    /// wake-up for jobs left over from a previous run.
    pub fn start(self: &Arc<Self>) {
        let agents: Vec<Agent> = {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
            registry.active_agents().cloned().collect()
        };

        tracing::info!("Orchestrator: Starting with {} active agents", agents.len());

        let mut recurring = self.recurring.lock().unwrap_or_else(|e| e.into_inner());
        for agent in agents {
            let interval = agent
                .http
                .interval_seconds
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(self.settings.check_interval);

            let weak: Weak<Self> = Arc::downgrade(self);
            let agent_id = agent.id.clone();
            let handle = self.timers.every(
                interval,
                Arc::new(move || {
                    let weak = weak.clone();
                    let agent_id = agent_id.clone();
                    Box::pin(async move {
                        if let Some(this) = weak.upgrade() {
                            this.schedule_check(&agent_id, Payload::new(), None, None);
                        }
                    }) as TimerTask
                }),
            );
            tracing::info!("Orchestrator: Checking {} every {:?}", agent.id, interval);
            recurring.push(handle);
        }
        drop(recurring);

        self.queue.normalize_now();
        self.schedule_wakeup(self.queue.next_scheduled_at());
    }

    /// Enqueue a check and make sure a wake-up covers it.
    pub fn schedule_check(
        self: &Arc<Self>,
        agent_id: &str,
        payload: Payload,
        timestamp: Option<i64>,
        priority: Option<i64>,
    ) -> bool {
        let accepted = self.queue.enqueue(agent_id, payload, timestamp, priority);
        if accepted {
            self.schedule_wakeup(self.queue.next_scheduled_at());
        }
        accepted
    }

    /// Keep at most one pending wake-up, at the earliest requested time.
    pub fn schedule_wakeup(self: &Arc<Self>, at: Option<i64>) {
        let Some(at) = at else {
            return;
        };
        let now = self.clock.now().timestamp();
        let at = at.max(now);
        let Some(when) = DateTime::from_timestamp(at, 0) else {
            tracing::warn!("Orchestrator: Ignoring wake-up at out-of-range timestamp {}", at);
            return;
        };

        let mut slot = self.wakeup.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pending) = *slot {
            if pending.at <= at {
                return;
            }
            self.timers.cancel(pending.handle);
        }

        let weak = Arc::downgrade(self);
        let handle = self.timers.at(
            when,
            Box::pin(async move {
                if let Some(this) = weak.upgrade() {
                    this.clear_wakeup(at);
                    this.drain().await;
                }
            }),
        );
        *slot = Some(PendingWakeup { at, handle });
        tracing::debug!("Orchestrator: Wake-up armed for {}", when);
    }

    fn clear_wakeup(&self, at: i64) {
        let mut slot = self.wakeup.lock().unwrap_or_else(|e| e.into_inner());
        if slot.map(|pending| pending.at == at).unwrap_or(false) {
            *slot = None;
        }
    }

    pub fn next_wakeup_at(&self) -> Option<i64> {
        let slot = self.wakeup.lock().unwrap_or_else(|e| e.into_inner());
        slot.map(|pending| pending.at)
    }

    /// Run every due job, archive the results and re-arm the wake-up.
    pub async fn drain(self: &Arc<Self>) -> DrainReport {
        let now = self.clock.now().timestamp();
        let due = self.queue.take_due(now);

        let mut probes = JoinSet::new();
        for (job, agent) in due.runnable {
            let this = self.clone();
            probes.spawn(async move { this.run_job(job, agent).await });
        }

        let mut report = DrainReport {
            discarded: due.discarded,
            ..Default::default()
        };
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(entry) => {
                    report.probed += 1;
                    if self
                        .archive_tx
                        .send(ArchiveCommand::Record(entry.clone()))
                        .await
                        .is_err()
                    {
                        tracing::error!("Orchestrator: Failed to send result for {}", entry.agent_id);
                    }
                    report.entries.push(entry);
                }
                Err(e) => tracing::error!("Orchestrator: Probe task failed: {}", e),
            }
        }

        if report.probed > 0 || report.discarded > 0 {
            tracing::info!(
                "Orchestrator: Drained {} jobs ({} discarded), {} remaining",
                report.probed,
                report.discarded,
                due.metrics.queue_length
            );
        }

        self.schedule_wakeup(self.queue.next_scheduled_at());
        report
    }

    async fn run_job(&self, job: Job, agent: Agent) -> ProbeEntry {
        let mut entry = match resolve_request(&job, &agent, &self.settings.probe_defaults) {
            Ok(request) => {
                let response = self.prober.probe(request).await;
                evaluate(&agent, &job, &response, self.thresholds.as_ref(), self.clock.now())
            }
            Err(e) => {
                let mut entry = ProbeEntry::new(self.clock.now(), &agent.id, Status::Unknown);
                entry.error = Some(e.to_string());
                entry
            }
        };

        self.apply_maintenance(&mut entry);

        let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        tracker.observe(&mut entry);
        entry
    }

    /// Failures inside a maintenance window are recorded as maintenance.
    fn apply_maintenance(&self, entry: &mut ProbeEntry) {
        if entry.status == Status::Up {
            return;
        }
        let window = {
            let resolver = self.maintenance.read().unwrap_or_else(|e| e.into_inner());
            resolver.find_active_window(&entry.agent_id, entry.timestamp)
        };
        let Some(window) = window else {
            return;
        };

        let label = window.definition.display_label().to_string();
        self.notices.record(MaintenanceNotice {
            message: format!(
                "{} result for {} suppressed by maintenance window '{}' (until {})",
                entry.status,
                entry.agent_id,
                label,
                window.occurrence.end.to_rfc3339()
            ),
            timestamp: entry.timestamp,
            agent_id: Some(entry.agent_id.clone()),
            label: Some(label),
        });
        entry.status = Status::Maintenance;
    }

    /// Latest queue metrics with their health verdict and the wake-up schedule.
    pub fn queue_health(&self) -> QueueHealthReport {
        let now = self.clock.now().timestamp();
        let metrics = self.queue.metrics().unwrap_or_else(|| {
            let limits = self.queue.limits();
            QueueMetrics {
                recorded_at: now,
                max_size: limits.max_size,
                ttl_secs: limits.ttl_secs,
                ..Default::default()
            }
        });
        let health = self.analyzer.analyze(&metrics, now);

        QueueHealthReport {
            schedule: QueueSchedule {
                next_wakeup_at: self.next_wakeup_at().and_then(|at| DateTime::from_timestamp(at, 0)),
                next_scheduled_at: metrics
                    .next_scheduled_at
                    .and_then(|at| DateTime::from_timestamp(at, 0)),
            },
            metrics,
            status: health.status,
            alerts: health.alerts,
        }
    }

    /// Wait until the archive writer has persisted everything sent so far.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.archive_tx.send(ArchiveCommand::Flush(done_tx)).await.is_err() {
            tracing::error!("Orchestrator: Archive writer is gone");
            return;
        }
        let _ = done_rx.await;
    }

    /// Cancel every timer and persist the archive.
    pub async fn shutdown(&self) {
        let handles: Vec<TimerHandle> = {
            let mut recurring = self.recurring.lock().unwrap_or_else(|e| e.into_inner());
            recurring.drain(..).collect()
        };
        for handle in handles {
            self.timers.cancel(handle);
        }
        let pending = self.wakeup.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(pending) = pending {
            self.timers.cancel(pending.handle);
        }

        self.flush().await;
        tracing::info!("Orchestrator: Stopped");
    }

    pub fn queue(&self) -> &Arc<RemoteJobQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn maintenance(&self) -> &Arc<RwLock<MaintenanceResolver>> {
        &self.maintenance
    }

    pub fn notices(&self) -> &Arc<NoticeLog> {
        &self.notices
    }

    pub fn archive(&self) -> &Arc<ArchiveService> {
        &self.archive
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
