use std::time::Instant;

use tracing::{debug, info};

use crate::model::{hours_to_ms, minutes_to_ms, now_ms};
use crate::observability;
use crate::source::collect_window;
use crate::timers::HandlerClass;

use super::plan::plan;
use super::reduce::reduce;
use super::{Engine, EngineError};

impl Engine {
    /// Full reload: fetch the planning window, reduce, plan against the
    /// quota, tear down the previous timer generation, install the new one.
    ///
    /// Caller holds the batch lock. The fetch completes before any teardown,
    /// so a failed fetch leaves the previous generation fully intact.
    pub(super) async fn load_batch(&self) -> Result<(), EngineError> {
        let started = Instant::now();
        let scope = self.source.scope();
        let window_start = now_ms() + minutes_to_ms(self.cfg.lead_minutes);
        let window_end = window_start + hours_to_ms(self.cfg.window_hours);

        let (intervals, sync_token) =
            collect_window(self.source.as_ref(), &scope, window_start, window_end).await?;
        let fetched = intervals.len();
        let reduced = reduce(intervals, minutes_to_ms(self.cfg.tolerance_minutes));
        info!(
            "reduced {fetched} fetched intervals to {} batch entries",
            reduced.len()
        );

        let planned = plan(reduced, self.cfg.timer_quota, window_end, sync_token);
        if planned.deferred > 0 {
            info!(
                "{} intervals exceed the timer quota, deferring them to an early reload at {}",
                planned.deferred,
                planned.continuation.resume_at()
            );
        }

        self.clear_scheduled().await?;

        for event in &planned.events {
            let timer_id = self
                .timers
                .schedule_at(HandlerClass::IntervalStart, event.start)
                .await?;
            self.registry.put(&event.id, &timer_id, event.end)?;
            debug!(
                "timer {timer_id} set for interval {} starting {} (end {})",
                event.id, event.start, event.end
            );
        }

        let resume_at = planned.continuation.resume_at();
        self.timers.schedule_at(HandlerClass::Reload, resume_at).await?;
        match planned.continuation.sync_token() {
            Some(token) => {
                self.timers
                    .schedule_on_change(HandlerClass::ChangeSync, &scope)
                    .await?;
                self.set_sync_token(Some(token))?;
            }
            None => self.set_sync_token(None)?,
        }

        metrics::counter!(observability::RELOADS_TOTAL).increment(1);
        metrics::gauge!(observability::TIMERS_INSTALLED).set(planned.events.len() as f64);
        metrics::gauge!(observability::INTERVALS_DEFERRED).set(planned.deferred as f64);
        metrics::histogram!(observability::RELOAD_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        info!(
            "installed {} interval timers, next reload at {resume_at}",
            planned.events.len()
        );
        Ok(())
    }

    /// Cancel every timer of this engine's handler classes and drop the
    /// registry records of interval timers. Timers that already fired are no
    /// longer listed — their records were cleaned up at fire time.
    async fn clear_scheduled(&self) -> Result<(), EngineError> {
        let mut cleared = 0usize;
        for timer in self.timers.list_scheduled().await {
            self.timers.cancel(&timer.timer_id).await;
            if timer.class == HandlerClass::IntervalStart {
                self.registry.delete_by_timer_id(&timer.timer_id)?;
            }
            cleared += 1;
        }
        info!("cleared {cleared} previously scheduled timers");
        Ok(())
    }
}
