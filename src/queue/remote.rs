//! Persisted remote job queue with single-writer access.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::agents::{Agent, SharedRegistry};
use crate::clock::Clock;
use crate::db::{load_json, save_json, Persistence, KEY_JOB_QUEUE, KEY_QUEUE_METRICS};
use crate::observer::{Observer, TracingObserver};

use super::job::{is_representable, Job, Payload};
use super::normalize::{normalize, normalize_jobs, Normalized, QueueLimits, QueueMetrics};

/// Derives a job priority when the caller does not give one.
pub trait PriorityPolicy: Send + Sync {
    fn priority_for(&self, agent: &Agent) -> i64;
}

/// `round(weight * 100)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightPriority;

impl PriorityPolicy for WeightPriority {
    fn priority_for(&self, agent: &Agent) -> i64 {
        (agent.effective_weight() * 100.0).round() as i64
    }
}

/// Jobs removed from the queue because they are due.
#[derive(Debug, Clone)]
pub struct DueJobs {
    /// Due jobs of active agents, in queue order.
    pub runnable: Vec<(Job, Agent)>,
    /// Due jobs whose agent is inactive or unknown.
    pub discarded: usize,
    pub metrics: QueueMetrics,
}

pub struct RemoteJobQueue {
    store: Arc<dyn Persistence>,
    registry: SharedRegistry,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn Observer>,
    priority_policy: Arc<dyn PriorityPolicy>,
    limits: QueueLimits,
    write_lock: Mutex<()>,
}

impl RemoteJobQueue {
    pub fn new(
        store: Arc<dyn Persistence>,
        registry: SharedRegistry,
        clock: Arc<dyn Clock>,
        limits: QueueLimits,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            observer: Arc::new(TracingObserver),
            priority_policy: Arc::new(WeightPriority),
            limits,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_priority_policy(mut self, policy: Arc<dyn PriorityPolicy>) -> Self {
        self.priority_policy = policy;
        self
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    /// Add a check for an active agent.
    ///
    /// Returns false, leaving the queue untouched, when the agent is
    /// inactive or unknown, or the schedule lies outside the calendar. An accepted job may still be merged into an
    /// existing duplicate or evicted by the size bound.
    pub fn enqueue(
        &self,
        agent_id: &str,
        payload: Payload,
        scheduled_at: Option<i64>,
        priority: Option<i64>,
    ) -> bool {
        let agent = match self.active_agent(agent_id) {
            Some(agent) => agent,
            None => {
                tracing::warn!(
                    "RemoteJobQueue: Rejected job for inactive or unknown agent {}",
                    agent_id
                );
                return false;
            }
        };

        let now = self.clock.now().timestamp();
        let scheduled_at = scheduled_at.unwrap_or(now);
        if !is_representable(scheduled_at) {
            tracing::warn!(
                "RemoteJobQueue: Rejected job for {} scheduled out of range at {}",
                agent_id,
                scheduled_at
            );
            return false;
        }
        let priority = priority.unwrap_or_else(|| self.priority_policy.priority_for(&agent));
        let job = Job::new(&agent.id, payload, scheduled_at, now, priority);

        let _guard = self.lock();
        let mut raw = self.load_raw();
        raw.push(job.to_value());
        let out = normalize(raw, now, self.limits);
        self.commit(&out);

        tracing::debug!(
            "RemoteJobQueue: Enqueued {} at {} (priority {}), length {}",
            agent.id,
            job.scheduled_at,
            priority,
            out.metrics.queue_length
        );
        true
    }

    /// Run a normalization pass over the stored queue without changing its contents.
    pub fn normalize_now(&self) -> QueueMetrics {
        let now = self.clock.now().timestamp();
        let _guard = self.lock();
        let out = normalize(self.load_raw(), now, self.limits);
        self.commit(&out);
        out.metrics
    }

    /// Remove every job scheduled at or before `now` and re-normalize the rest.
    pub fn take_due(&self, now: i64) -> DueJobs {
        let _guard = self.lock();
        let first = normalize(self.load_raw(), now, self.limits);

        let (due, remaining): (Vec<Job>, Vec<Job>) =
            first.jobs.into_iter().partition(|job| job.scheduled_at <= now);

        let mut runnable = Vec::with_capacity(due.len());
        let mut discarded = 0;
        for job in due {
            match self.active_agent(&job.agent_id) {
                Some(agent) => runnable.push((job, agent)),
                None => {
                    tracing::warn!(
                        "RemoteJobQueue: Discarding due job for inactive agent {}",
                        job.agent_id
                    );
                    discarded += 1;
                }
            }
        }

        let mut rest = normalize_jobs(&remaining, now, self.limits);
        rest.metrics.requested = first.metrics.requested;
        rest.metrics.dropped_invalid = first.metrics.dropped_invalid;
        rest.metrics.dropped_expired = first.metrics.dropped_expired;
        rest.metrics.dropped_duplicates = first.metrics.dropped_duplicates;
        rest.metrics.dropped_overflow = first.metrics.dropped_overflow;
        self.commit(&rest);

        DueJobs {
            runnable,
            discarded,
            metrics: rest.metrics,
        }
    }

    /// The stored queue, in order.
    pub fn jobs(&self) -> Vec<Job> {
        self.load_raw().iter().filter_map(Job::from_value).collect()
    }

    pub fn next_scheduled_at(&self) -> Option<i64> {
        self.jobs().iter().map(|j| j.scheduled_at).min()
    }

    /// The snapshot written by the latest pass.
    pub fn metrics(&self) -> Option<QueueMetrics> {
        load_json(self.store.as_ref(), KEY_QUEUE_METRICS)
    }

    fn active_agent(&self, agent_id: &str) -> Option<Agent> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.active(agent_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Malformed persisted state reads as an empty queue.
    fn load_raw(&self) -> Vec<Value> {
        load_json(self.store.as_ref(), KEY_JOB_QUEUE).unwrap_or_default()
    }

    fn commit(&self, out: &Normalized) {
        if let Err(e) = save_json(self.store.as_ref(), KEY_JOB_QUEUE, &out.jobs) {
            tracing::error!("RemoteJobQueue: Failed to save queue: {}", e);
        }
        if let Err(e) = save_json(self.store.as_ref(), KEY_QUEUE_METRICS, &out.metrics) {
            tracing::error!("RemoteJobQueue: Failed to save metrics: {}", e);
        }
        self.observer.on_queue_metrics_recorded(&out.metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRegistry;
    use crate::clock::ManualClock;
    use crate::db::MemoryStore;
    use crate::observer::testing::RecordingObserver;
    use serde_json::json;

    const T: i64 = 1_700_000_000;

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: SharedRegistry,
        observer: Arc<RecordingObserver>,
        queue: RemoteJobQueue,
    }

    fn fixture(limits: QueueLimits) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mut eu1 = Agent::new("eu1");
        eu1.weight = 0.5;
        let mut us1 = Agent::new("us1");
        us1.active = false;
        let registry = AgentRegistry::new(vec![eu1, us1, Agent::new("ap1")]).into_shared();
        let observer = Arc::new(RecordingObserver::default());
        let queue = RemoteJobQueue::new(
            store.clone(),
            registry.clone(),
            Arc::new(ManualClock::at_timestamp(T)),
            limits,
        )
        .with_observer(observer.clone());
        Fixture {
            store,
            registry,
            observer,
            queue,
        }
    }

    #[test]
    fn test_enqueue_duplicate_keeps_higher_priority() {
        let f = fixture(QueueLimits::default());
        assert!(f.queue.enqueue("eu1", Payload::new(), Some(T), Some(0)));
        assert!(f.queue.enqueue("eu1", Payload::new(), Some(T), Some(5)));

        let jobs = f.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].priority, 5);

        let metrics = f.queue.metrics().unwrap();
        assert_eq!(metrics.queue_length, 1);
        assert_eq!(metrics.dropped_duplicates, 1);
        assert_eq!(f.observer.metrics.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_enqueue_rejects_inactive_and_unknown() {
        let f = fixture(QueueLimits::default());
        assert!(!f.queue.enqueue("us1", Payload::new(), None, None));
        assert!(!f.queue.enqueue("nobody", Payload::new(), None, None));
        assert!(f.queue.jobs().is_empty());
        assert!(f.queue.metrics().is_none());
        assert!(f.observer.metrics.lock().unwrap().is_empty());
    }

    #[test]
    fn test_enqueue_rejects_out_of_range_schedule() {
        let f = fixture(QueueLimits::default());
        assert!(!f.queue.enqueue("eu1", Payload::new(), Some(4_611_686_018_427_387_903), None));
        assert!(!f.queue.enqueue("eu1", Payload::new(), Some(i64::MIN), None));
        assert!(f.queue.jobs().is_empty());
        assert!(f.queue.metrics().is_none());

        assert!(f.queue.enqueue("eu1", Payload::new(), Some(T + 60), Some(i64::MAX)));
        assert!(f.queue.enqueue("ap1", Payload::new(), Some(T + 60), Some(i64::MAX)));
        assert_eq!(f.queue.metrics().unwrap().max_priority, Some(i64::MAX));
    }

    #[test]
    fn test_enqueue_derives_priority_from_weight() {
        let f = fixture(QueueLimits::default());
        assert!(f.queue.enqueue("eu1", Payload::new(), None, None));
        let jobs = f.queue.jobs();
        assert_eq!(jobs[0].priority, 50);
        assert_eq!(jobs[0].scheduled_at, T);
        assert_eq!(jobs[0].created_at, T);
    }

    #[test]
    fn test_custom_priority_policy() {
        struct Flat;
        impl PriorityPolicy for Flat {
            fn priority_for(&self, _agent: &Agent) -> i64 {
                7
            }
        }
        let f = fixture(QueueLimits::default());
        let queue = RemoteJobQueue::new(
            f.store.clone(),
            f.registry.clone(),
            Arc::new(ManualClock::at_timestamp(T)),
            QueueLimits::default(),
        )
        .with_priority_policy(Arc::new(Flat));
        assert!(queue.enqueue("ap1", Payload::new(), None, None));
        assert_eq!(queue.jobs()[0].priority, 7);
    }

    #[test]
    fn test_overflow_on_enqueue() {
        let f = fixture(QueueLimits { max_size: 3, ttl_secs: 0 });
        for i in 0..5 {
            assert!(f.queue.enqueue("ap1", Payload::new(), Some(T + 100 - i), Some(0)));
        }
        let jobs = f.queue.jobs();
        assert_eq!(jobs.len(), 3);
        let scheduled: Vec<i64> = jobs.iter().map(|j| j.scheduled_at).collect();
        assert_eq!(scheduled, vec![T + 96, T + 97, T + 98]);
        assert_eq!(f.queue.metrics().unwrap().dropped_overflow, 1);
    }

    #[test]
    fn test_malformed_state_reads_as_empty() {
        let f = fixture(QueueLimits::default());
        f.store.save(KEY_JOB_QUEUE, "{\"not\": \"a list\"}").unwrap();
        assert!(f.queue.jobs().is_empty());

        assert!(f.queue.enqueue("ap1", Payload::new(), None, Some(1)));
        assert_eq!(f.queue.jobs().len(), 1);
    }

    #[test]
    fn test_malformed_items_are_dropped_on_next_pass() {
        let f = fixture(QueueLimits::default());
        let raw = json!([
            {"agent_id": "ap1", "scheduled_at": T + 10},
            {"agent_id": 12},
            "junk"
        ]);
        f.store.save(KEY_JOB_QUEUE, &raw.to_string()).unwrap();

        let metrics = f.queue.normalize_now();
        assert_eq!(metrics.requested, 3);
        assert_eq!(metrics.dropped_invalid, 2);
        assert_eq!(metrics.queue_length, 1);
        assert_eq!(f.queue.next_scheduled_at(), Some(T + 10));
    }

    #[test]
    fn test_take_due_removes_only_due_jobs() {
        let f = fixture(QueueLimits::default());
        assert!(f.queue.enqueue("ap1", Payload::new(), Some(T - 5), Some(1)));
        assert!(f.queue.enqueue("eu1", Payload::new(), Some(T), Some(9)));
        assert!(f.queue.enqueue("ap1", Payload::new(), Some(T + 60), Some(0)));

        let due = f.queue.take_due(T);
        let agents: Vec<&str> = due.runnable.iter().map(|(j, _)| j.agent_id.as_str()).collect();
        assert_eq!(agents, vec!["eu1", "ap1"]);
        assert_eq!(due.discarded, 0);
        assert_eq!(due.metrics.queue_length, 1);

        let left = f.queue.jobs();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].scheduled_at, T + 60);
    }

    #[test]
    fn test_take_due_discards_jobs_of_deactivated_agents() {
        let f = fixture(QueueLimits::default());
        assert!(f.queue.enqueue("ap1", Payload::new(), Some(T), None));
        f.registry.write().unwrap().set_active("ap1", false);

        let due = f.queue.take_due(T);
        assert!(due.runnable.is_empty());
        assert_eq!(due.discarded, 1);
        assert!(f.queue.jobs().is_empty());
    }
}
