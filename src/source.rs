use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::{Interval, Ms};

#[derive(Debug)]
pub enum SourceError {
    Transport(String),
    Malformed(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Transport(e) => write!(f, "event source transport error: {e}"),
            SourceError::Malformed(e) => write!(f, "event source returned malformed data: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// One page of a windowed interval listing. The sync token, when the source
/// supports change feeds, arrives on the final page.
pub struct IntervalPage {
    pub intervals: Vec<Interval>,
    pub next_page: Option<String>,
    pub sync_token: Option<String>,
}

/// One page of the changed-only feed. Token invalidation is a value, not an
/// error — callers fall back to a full window fetch on `TokenInvalid`.
pub enum ChangeBatch {
    Changes {
        intervals: Vec<Interval>,
        next_page: Option<String>,
        next_token: Option<String>,
    },
    TokenInvalid,
}

/// Upstream feed of busy intervals. Filtering (free/transparent entries,
/// cancelled entries, malformed times) is this collaborator's responsibility;
/// the engine only ever sees well-formed busy intervals.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Opaque scope token for the backing calendar.
    fn scope(&self) -> String;

    async fn list_intervals(
        &self,
        scope: &str,
        window_start: Ms,
        window_end: Ms,
        page: Option<&str>,
    ) -> Result<IntervalPage, SourceError>;

    async fn list_changed(
        &self,
        sync_token: &str,
        page: Option<&str>,
    ) -> Result<ChangeBatch, SourceError>;
}

/// Fully drained change feed.
pub enum ChangeSet {
    Changed {
        intervals: Vec<Interval>,
        next_token: Option<String>,
    },
    TokenInvalid,
}

/// Drain every page of the planning window, then clip, filter and sort.
/// Nothing is mutated anywhere until the whole fetch has succeeded.
pub async fn collect_window(
    source: &dyn EventSource,
    scope: &str,
    window_start: Ms,
    window_end: Ms,
) -> Result<(Vec<Interval>, Option<String>), SourceError> {
    let mut all = Vec::new();
    let mut page: Option<String> = None;
    let mut sync_token = None;

    loop {
        let batch = source
            .list_intervals(scope, window_start, window_end, page.as_deref())
            .await?;
        all.extend(batch.intervals);
        if let Some(token) = batch.sync_token {
            sync_token = Some(token);
        }
        match batch.next_page {
            Some(next) => page = Some(next),
            None => break,
        }
    }

    Ok((clip_and_sort(all, window_start), sync_token))
}

/// Drain every page of the changed-only feed. Invalidation on any page
/// invalidates the whole drain.
pub async fn collect_changes(
    source: &dyn EventSource,
    sync_token: &str,
) -> Result<ChangeSet, SourceError> {
    let mut all: Vec<Interval> = Vec::new();
    let mut page: Option<String> = None;
    let mut next_token = None;

    loop {
        match source.list_changed(sync_token, page.as_deref()).await? {
            ChangeBatch::TokenInvalid => return Ok(ChangeSet::TokenInvalid),
            ChangeBatch::Changes {
                intervals,
                next_page,
                next_token: token,
            } => {
                all.extend(intervals);
                if let Some(t) = token {
                    next_token = Some(t);
                }
                match next_page {
                    Some(next) => page = Some(next),
                    None => break,
                }
            }
        }
    }

    // Changed intervals keep their own bounds (replace-not-patch downstream);
    // only malformed entries are dropped.
    all.retain(|iv| iv.start < iv.end);
    all.sort_by_key(|iv| iv.start);
    Ok(ChangeSet::Changed {
        intervals: all,
        next_token,
    })
}

/// The window fetch filters by *end* time, so an interval may have started
/// before the window began; clamp those starts to the window edge. Drops
/// already-ended and zero-length entries, sorts ascending by start.
pub fn clip_and_sort(mut intervals: Vec<Interval>, window_start: Ms) -> Vec<Interval> {
    intervals.retain(|iv| iv.start < iv.end && iv.end > window_start);
    for iv in &mut intervals {
        if iv.start < window_start {
            iv.start = window_start;
        }
    }
    intervals.sort_by_key(|iv| iv.start);
    intervals
}

// ── File-backed source ───────────────────────────────────────────

#[derive(Deserialize)]
struct ScheduleEntry {
    id: String,
    start: Ms,
    end: Ms,
    /// "Show me as available" — entry is never scheduled.
    #[serde(default)]
    free: bool,
}

/// Event source backed by a JSON schedule file (an array of
/// `{id, start, end, free?}` entries).
///
/// Its change token is a CRC32 of the file contents: a flat file cannot be
/// diffed per interval, so `list_changed` reports either "nothing changed"
/// (same checksum) or `TokenInvalid` (anything changed), pushing the caller
/// onto the full-reload path.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn read(&self) -> Result<(Vec<ScheduleEntry>, String), SourceError> {
        let bytes =
            std::fs::read(&self.path).map_err(|e| SourceError::Transport(e.to_string()))?;
        let entries: Vec<ScheduleEntry> =
            serde_json::from_slice(&bytes).map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok((entries, content_token(&bytes)))
    }
}

/// CRC32 of the schedule file, formatted as the change token.
pub fn content_token(bytes: &[u8]) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    format!("{:08x}", hasher.finalize())
}

#[async_trait]
impl EventSource for FileSource {
    fn scope(&self) -> String {
        self.path.display().to_string()
    }

    async fn list_intervals(
        &self,
        _scope: &str,
        window_start: Ms,
        window_end: Ms,
        _page: Option<&str>,
    ) -> Result<IntervalPage, SourceError> {
        let (entries, token) = self.read()?;
        let intervals = entries
            .into_iter()
            .filter(|e| !e.free && e.start < e.end)
            .filter(|e| e.end > window_start && e.start < window_end)
            .map(|e| Interval {
                id: e.id,
                start: e.start,
                end: e.end,
            })
            .collect();
        Ok(IntervalPage {
            intervals,
            next_page: None,
            sync_token: Some(token),
        })
    }

    async fn list_changed(
        &self,
        sync_token: &str,
        _page: Option<&str>,
    ) -> Result<ChangeBatch, SourceError> {
        let (_, current) = self.read()?;
        if current == sync_token {
            Ok(ChangeBatch::Changes {
                intervals: Vec::new(),
                next_page: None,
                next_token: Some(current),
            })
        } else {
            Ok(ChangeBatch::TokenInvalid)
        }
    }
}
