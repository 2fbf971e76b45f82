use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use ulid::Ulid;

use crate::model::{Ms, now_ms};

#[derive(Debug)]
pub enum ScheduleError {
    QuotaExceeded(usize),
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::QuotaExceeded(max) => {
                write!(f, "timer quota exhausted: {max} outstanding timers")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Which entry point a timer dispatches to when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerClass {
    /// A planned interval's start — flips the presence indicator.
    IntervalStart,
    /// The continuation's resume point — triggers a full reload.
    Reload,
    /// A change notification for the calendar scope — triggers a sync.
    ChangeSync,
}

impl HandlerClass {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            HandlerClass::IntervalStart => "interval_start",
            HandlerClass::Reload => "reload",
            HandlerClass::ChangeSync => "change_sync",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledTimer {
    pub timer_id: String,
    pub class: HandlerClass,
}

/// Delivered to the host dispatch loop when a timer fires.
#[derive(Debug)]
pub struct FiredTimer {
    pub timer_id: String,
    pub class: HandlerClass,
}

/// Host scheduling facility. The platform owns timer identity (ids are opaque
/// strings) and enforces a hard bound on outstanding timers per process —
/// that bound, minus reserved headroom, is the planner's quota.
#[async_trait]
pub trait TimerScheduler: Send + Sync {
    async fn schedule_at(&self, class: HandlerClass, at: Ms) -> Result<String, ScheduleError>;

    /// Register a change-notification subscription for a calendar scope.
    /// Subscriptions count against the same quota as one-shot timers.
    async fn schedule_on_change(
        &self,
        class: HandlerClass,
        scope: &str,
    ) -> Result<String, ScheduleError>;

    /// Idempotent: cancelling an unknown or already-fired id is a no-op.
    async fn cancel(&self, timer_id: &str);

    async fn list_scheduled(&self) -> Vec<ScheduledTimer>;
}

enum TimerEntry {
    Sleeping {
        class: HandlerClass,
        abort: AbortHandle,
    },
    Subscription {
        class: HandlerClass,
        scope: String,
    },
}

impl TimerEntry {
    fn class(&self) -> HandlerClass {
        match self {
            TimerEntry::Sleeping { class, .. } | TimerEntry::Subscription { class, .. } => *class,
        }
    }
}

/// In-process `TimerScheduler`: each one-shot timer is a tokio task sleeping
/// until its fire time, delivering a `FiredTimer` over the channel returned
/// by `new`. A fired timer removes itself before delivery, so teardown never
/// sees an already-fired id.
pub struct HostTimers {
    entries: Arc<DashMap<String, TimerEntry>>,
    fired_tx: mpsc::Sender<FiredTimer>,
    max_timers: usize,
}

impl HostTimers {
    pub fn new(max_timers: usize) -> (Arc<Self>, mpsc::Receiver<FiredTimer>) {
        let (fired_tx, fired_rx) = mpsc::channel(64);
        (
            Arc::new(Self {
                entries: Arc::new(DashMap::new()),
                fired_tx,
                max_timers,
            }),
            fired_rx,
        )
    }

    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }

    /// Fire every change subscription registered for `scope`. Called by
    /// whatever watches the upstream calendar for edits.
    pub async fn notify_change(&self, scope: &str) {
        let matching: Vec<(String, HandlerClass)> = self
            .entries
            .iter()
            .filter_map(|entry| match entry.value() {
                TimerEntry::Subscription { class, scope: s } if s == scope => {
                    Some((entry.key().clone(), *class))
                }
                _ => None,
            })
            .collect();
        for (timer_id, class) in matching {
            let _ = self.fired_tx.send(FiredTimer { timer_id, class }).await;
        }
    }

    fn check_quota(&self) -> Result<(), ScheduleError> {
        if self.entries.len() >= self.max_timers {
            return Err(ScheduleError::QuotaExceeded(self.max_timers));
        }
        Ok(())
    }
}

#[async_trait]
impl TimerScheduler for HostTimers {
    async fn schedule_at(&self, class: HandlerClass, at: Ms) -> Result<String, ScheduleError> {
        self.check_quota()?;
        let timer_id = Ulid::new().to_string();

        let entries = self.entries.clone();
        let tx = self.fired_tx.clone();
        let id = timer_id.clone();
        // The task waits for registration before sleeping, so a timer whose
        // fire time has already passed cannot race its own insert.
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if ready_rx.await.is_err() {
                return;
            }
            let delay = (at - now_ms()).max(0) as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            entries.remove(&id);
            let _ = tx.send(FiredTimer { timer_id: id, class }).await;
        });
        self.entries.insert(
            timer_id.clone(),
            TimerEntry::Sleeping {
                class,
                abort: handle.abort_handle(),
            },
        );
        let _ = ready_tx.send(());
        Ok(timer_id)
    }

    async fn schedule_on_change(
        &self,
        class: HandlerClass,
        scope: &str,
    ) -> Result<String, ScheduleError> {
        self.check_quota()?;
        let timer_id = Ulid::new().to_string();
        self.entries.insert(
            timer_id.clone(),
            TimerEntry::Subscription {
                class,
                scope: scope.to_string(),
            },
        );
        Ok(timer_id)
    }

    async fn cancel(&self, timer_id: &str) {
        if let Some((_, entry)) = self.entries.remove(timer_id)
            && let TimerEntry::Sleeping { abort, .. } = entry
        {
            abort.abort();
        }
    }

    async fn list_scheduled(&self) -> Vec<ScheduledTimer> {
        self.entries
            .iter()
            .map(|entry| ScheduledTimer {
                timer_id: entry.key().clone(),
                class: entry.value().class(),
            })
            .collect()
    }
}
