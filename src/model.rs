use serde::{Deserialize, Serialize};

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const fn seconds_to_ms(seconds: i64) -> Ms {
    seconds * 1000
}

pub const fn minutes_to_ms(minutes: i64) -> Ms {
    seconds_to_ms(minutes * 60)
}

pub const fn hours_to_ms(hours: i64) -> Ms {
    minutes_to_ms(hours * 60)
}

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as Ms
}

/// One busy period `[start, end)` with a stable upstream identifier.
///
/// Immutable once emitted by the source; only the reducer extends the
/// terminal interval's `end` while building a merged sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: String,
    pub start: Ms,
    pub end: Ms,
}

impl Interval {
    pub fn new(id: impl Into<String>, start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Interval start must be before end");
        Self {
            id: id.into(),
            start,
            end,
        }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }
}

/// Persisted link between a scheduled timer and the interval it fires for.
/// The registry keeps this in both of its projections; see `TimerRegistry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub interval_id: String,
    pub interval_end: Ms,
}
