mod error;
mod load;
mod plan;
mod reduce;
mod registry;
mod sync;

pub use error::EngineError;
pub use plan::{Continuation, PlannedBatch, plan};
pub use reduce::reduce;
pub use registry::TimerRegistry;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::observability;
use crate::source::EventSource;
use crate::status::StatusPresenter;
use crate::store::PersistentStore;
use crate::timers::TimerScheduler;

use sync::SyncOutcome;

const SYNC_TOKEN_KEY: &str = "syncToken";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Look-ahead window covered by one batch.
    pub window_hours: i64,
    /// Gap below which adjacent intervals are fused.
    pub tolerance_minutes: i64,
    /// Offset of the window start past now; intervals starting sooner than
    /// this were already handled by the previous batch.
    pub lead_minutes: i64,
    /// Interval timers allowed per batch: the host's hard timer bound minus
    /// the reserved slots for the reload timer and change subscription.
    pub timer_quota: usize,
    /// Bounded wait for the batch lock before abandoning the operation.
    pub lock_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            tolerance_minutes: 5,
            lead_minutes: 5,
            timer_quota: 18,
            lock_wait_ms: 250,
        }
    }
}

/// Orchestrates the batch lifecycle: full reloads, incremental syncs, and
/// per-interval firings, over injected collaborators.
///
/// The two whole-batch operations are mutually exclusive through
/// `batch_lock`; a contended acquisition is abandoned rather than queued,
/// because the pass holding the lock is already doing the same work and a
/// second pass would race it on timer teardown. Per-interval firing never
/// takes the lock — it either sees the pre-reload record (one extra status
/// update at worst) or the post-reload record, never a half-written registry,
/// since teardown and install both complete inside the lock.
pub struct Engine {
    source: Arc<dyn EventSource>,
    timers: Arc<dyn TimerScheduler>,
    presenter: Arc<dyn StatusPresenter>,
    store: Arc<dyn PersistentStore>,
    registry: TimerRegistry,
    cfg: EngineConfig,
    batch_lock: Mutex<()>,
}

impl Engine {
    pub fn new(
        source: Arc<dyn EventSource>,
        timers: Arc<dyn TimerScheduler>,
        presenter: Arc<dyn StatusPresenter>,
        store: Arc<dyn PersistentStore>,
        cfg: EngineConfig,
    ) -> Self {
        let registry = TimerRegistry::new(store.clone());
        Self {
            source,
            timers,
            presenter,
            store,
            registry,
            cfg,
            batch_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &TimerRegistry {
        &self.registry
    }

    /// Replace the active timer generation with a freshly planned batch.
    /// Skips silently if another batch operation holds the lock.
    pub async fn trigger_full_reload(&self) -> Result<(), EngineError> {
        let Some(_guard) = self.try_batch_lock().await else {
            return Ok(());
        };
        self.load_batch().await
    }

    /// React to a change notification. Without a held sync token this is a
    /// full reload; an invalid token falls back to one under the same lock.
    pub async fn trigger_sync(&self) -> Result<(), EngineError> {
        let Some(_guard) = self.try_batch_lock().await else {
            return Ok(());
        };
        match self.sync_token()? {
            None => {
                info!("no change-sync token held, treating sync as a full reload");
                self.load_batch().await
            }
            Some(token) => match self.sync_changes(&token).await? {
                SyncOutcome::Applied { replaced, skipped } => {
                    info!("incremental sync applied: {replaced} replaced, {skipped} skipped");
                    Ok(())
                }
                SyncOutcome::TokenInvalid => {
                    info!("change-sync token no longer valid, falling back to a full reload");
                    metrics::counter!(observability::SYNC_FALLBACKS_TOTAL).increment(1);
                    self.load_batch().await
                }
            },
        }
    }

    /// Handle a fired interval timer. Runs outside the batch lock.
    pub async fn on_timer_fire(&self, timer_id: &str) -> Result<(), EngineError> {
        let Some(record) = self.registry.record(timer_id)? else {
            // A reload or sync superseded this timer after it was queued for
            // dispatch; its interval is no longer ours to present.
            warn!("no record for fired timer {timer_id}, ignoring");
            metrics::counter!(observability::FIRES_TOTAL, "outcome" => "orphaned").increment(1);
            return Ok(());
        };

        // Fire-time cleanup: teardown never sees an already-fired timer, so
        // the record has to go now.
        self.registry.delete(Some(&record.interval_id), Some(timer_id))?;

        info!(
            "interval {} started, busy until {}",
            record.interval_id, record.interval_end
        );
        self.presenter.set_busy(record.interval_end).await?;
        metrics::counter!(observability::FIRES_TOTAL, "outcome" => "presented").increment(1);
        Ok(())
    }

    async fn try_batch_lock(&self) -> Option<MutexGuard<'_, ()>> {
        let wait = Duration::from_millis(self.cfg.lock_wait_ms);
        match tokio::time::timeout(wait, self.batch_lock.lock()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                info!("another batch operation is in progress, abandoning this one");
                metrics::counter!(observability::LOCK_BUSY_TOTAL).increment(1);
                None
            }
        }
    }

    fn sync_token(&self) -> Result<Option<String>, EngineError> {
        Ok(self.store.get(SYNC_TOKEN_KEY)?)
    }

    fn set_sync_token(&self, token: Option<&str>) -> Result<(), EngineError> {
        match token {
            Some(t) => self.store.set(SYNC_TOKEN_KEY, t)?,
            None => self.store.delete(SYNC_TOKEN_KEY)?,
        }
        Ok(())
    }
}
