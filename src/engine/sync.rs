use std::collections::HashSet;

use tracing::{debug, warn};

use crate::observability;
use crate::source::{ChangeSet, collect_changes};
use crate::timers::HandlerClass;

use super::{Engine, EngineError};

pub(super) enum SyncOutcome {
    Applied { replaced: usize, skipped: usize },
    TokenInvalid,
}

impl Engine {
    /// Incremental reconciliation against the changed-only feed.
    ///
    /// Every change is a replacement, never a patch: the interval's old timer
    /// and record are removed and a fresh pair installed from its current
    /// bounds. Caller holds the batch lock.
    ///
    /// An interval that was fused into a neighbour during the original load
    /// has no registry entry under its own id; it is skipped here rather than
    /// guessed at (there is no way to un-fuse one member of a merged run),
    /// and the periodic full reload trues the batch up. The fused run's head
    /// interval, by contrast, is replaced using its own new bounds without
    /// re-running the merge.
    pub(super) async fn sync_changes(&self, token: &str) -> Result<SyncOutcome, EngineError> {
        let (intervals, next_token) =
            match collect_changes(self.source.as_ref(), token).await? {
                ChangeSet::TokenInvalid => return Ok(SyncOutcome::TokenInvalid),
                ChangeSet::Changed {
                    intervals,
                    next_token,
                } => (intervals, next_token),
            };

        let live: HashSet<String> = self
            .timers
            .list_scheduled()
            .await
            .into_iter()
            .filter(|t| t.class == HandlerClass::IntervalStart)
            .map(|t| t.timer_id)
            .collect();

        let mut replaced = 0usize;
        let mut skipped = 0usize;
        for interval in intervals {
            let Some(old_timer) = self.registry.timer_for(&interval.id)? else {
                warn!(
                    "no timer recorded for changed interval {}, leaving it for the next reload",
                    interval.id
                );
                skipped += 1;
                continue;
            };

            if live.contains(&old_timer) {
                self.timers.cancel(&old_timer).await;
            }
            self.registry.delete(Some(&interval.id), Some(&old_timer))?;

            let timer_id = self
                .timers
                .schedule_at(HandlerClass::IntervalStart, interval.start)
                .await?;
            self.registry.put(&interval.id, &timer_id, interval.end)?;
            debug!(
                "replaced timer {old_timer} with {timer_id} for changed interval {}",
                interval.id
            );
            replaced += 1;
        }

        if let Some(next) = next_token {
            self.set_sync_token(Some(&next))?;
        }

        metrics::counter!(observability::SYNC_REPLACED_TOTAL).increment(replaced as u64);
        metrics::counter!(observability::SYNC_SKIPPED_TOTAL).increment(skipped as u64);
        Ok(SyncOutcome::Applied { replaced, skipped })
    }
}
