use crate::model::{Interval, Ms};

/// How the next planning pass is triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Purely time-based: reload the full window at this time.
    ResumeAt(Ms),
    /// Change-driven: hold this token and react to change notifications,
    /// with a time-based reload at `resume_at` as the backstop.
    ChangeSync { token: String, resume_at: Ms },
}

impl Continuation {
    pub fn resume_at(&self) -> Ms {
        match self {
            Continuation::ResumeAt(at) => *at,
            Continuation::ChangeSync { resume_at, .. } => *resume_at,
        }
    }

    pub fn sync_token(&self) -> Option<&str> {
        match self {
            Continuation::ResumeAt(_) => None,
            Continuation::ChangeSync { token, .. } => Some(token),
        }
    }
}

/// A reduced batch fitted to the timer quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBatch {
    /// At most `quota` intervals, ascending by start.
    pub events: Vec<Interval>,
    pub continuation: Continuation,
    /// Reduced intervals left out of this batch.
    pub deferred: usize,
}

/// Fit a reduced batch into the timer quota.
///
/// Greedy and order-preserving: when the quota is exceeded, the earliest
/// `quota` intervals win and the reload is pulled forward to the end of the
/// last included interval, so the overflow is picked up promptly instead of
/// waiting out the window. A truncated batch never keeps a change-sync
/// continuation — its pulled-forward reload is the recovery path, and a
/// change feed cannot see the deferred tail anyway.
pub fn plan(
    reduced: Vec<Interval>,
    quota: usize,
    window_end: Ms,
    sync_token: Option<String>,
) -> PlannedBatch {
    if reduced.len() > quota {
        let deferred = reduced.len() - quota;
        let mut events = reduced;
        events.truncate(quota);
        let resume_at = events
            .last()
            .map(|iv| iv.end)
            .unwrap_or(window_end);
        PlannedBatch {
            events,
            continuation: Continuation::ResumeAt(resume_at),
            deferred,
        }
    } else {
        let continuation = match sync_token {
            Some(token) => Continuation::ChangeSync {
                token,
                resume_at: window_end,
            },
            None => Continuation::ResumeAt(window_end),
        };
        PlannedBatch {
            events: reduced,
            continuation,
            deferred: 0,
        }
    }
}
