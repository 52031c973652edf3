//! One-shot and recurring timers.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::clock::Clock;

pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Produces a fresh future for every tick.
pub type RecurringTask = Arc<dyn Fn() -> TimerTask + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

pub trait Timers: Send + Sync {
    /// Run `task` once at `when`. A time in the past runs right away.
    fn at(&self, when: DateTime<Utc>, task: TimerTask) -> TimerHandle;
    /// Run `task` now and then every `interval`.
    fn every(&self, interval: Duration, task: RecurringTask) -> TimerHandle;
    /// Unknown or already finished handles are ignored.
    fn cancel(&self, handle: TimerHandle);
}

/// Timers backed by spawned tokio tasks; cancel aborts the task.
pub struct TokioTimers {
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    running: Arc<Mutex<HashMap<TimerHandle, JoinHandle<()>>>>,
}

impl TokioTimers {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: AtomicU64::new(1),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn next_handle(&self) -> TimerHandle {
        TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Timers that have not finished or been cancelled.
    pub fn active(&self) -> usize {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.values().filter(|join| !join.is_finished()).count()
    }
}

impl Timers for TokioTimers {
    fn at(&self, when: DateTime<Utc>, task: TimerTask) -> TimerHandle {
        let handle = self.next_handle();
        let delay = (when - self.clock.now()).to_std().unwrap_or(Duration::ZERO);

        // Held across spawn so the task cannot remove itself before it is inserted
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let registry = self.running.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            registry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&handle);
        });
        running.insert(handle, join);
        handle
    }

    fn every(&self, interval: Duration, task: RecurringTask) -> TimerHandle {
        let handle = self.next_handle();
        let interval = interval.max(Duration::from_millis(1));

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                task().await;
            }
        });
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, join);
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        let join = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle);
        if let Some(join) = join {
            join.abort();
        }
    }
}
