use std::sync::Arc;

use crate::model::{Ms, TimerRecord};
use crate::store::{PersistentStore, StoreError};

const TIMER_FOR_PREFIX: &str = "timerFor/";
const RECORD_PREFIX: &str = "record/";

/// Persistent bidirectional index between timer ids and interval ids.
///
/// A logical record is stored as two projections: `timerFor/{interval_id}` →
/// timer id, and `record/{timer_id}` → the JSON `TimerRecord`. The backing
/// store has no cross-key transactions, so a crash between the two writes can
/// leave one projection without the other; every operation here tolerates
/// that divergence and deletion clears whatever it can reach.
pub struct TimerRegistry {
    store: Arc<dyn PersistentStore>,
}

impl TimerRegistry {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    fn timer_key(interval_id: &str) -> String {
        format!("{TIMER_FOR_PREFIX}{interval_id}")
    }

    fn record_key(timer_id: &str) -> String {
        format!("{RECORD_PREFIX}{timer_id}")
    }

    /// Create (or overwrite) the record in both projections.
    pub fn put(&self, interval_id: &str, timer_id: &str, interval_end: Ms) -> Result<(), StoreError> {
        self.store.set(&Self::timer_key(interval_id), timer_id)?;
        let record = TimerRecord {
            interval_id: interval_id.to_string(),
            interval_end,
        };
        let json = serde_json::to_string(&record).map_err(|e| StoreError::Io(e.to_string()))?;
        self.store.set(&Self::record_key(timer_id), &json)
    }

    pub fn timer_for(&self, interval_id: &str) -> Result<Option<String>, StoreError> {
        self.store.get(&Self::timer_key(interval_id))
    }

    pub fn record(&self, timer_id: &str) -> Result<Option<TimerRecord>, StoreError> {
        match self.store.get(&Self::record_key(timer_id))? {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(e.to_string())),
        }
    }

    /// Delete both projections of a record, given either or both keys.
    ///
    /// A missing key is resolved through the surviving projection when
    /// possible, so `delete(interval, None)` also clears the record behind
    /// the paired timer id. Resolution is best-effort: a failed or empty
    /// lookup never blocks cleanup of the side that is known. Deleting an
    /// absent record is a no-op.
    pub fn delete(
        &self,
        interval_id: Option<&str>,
        timer_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let timer_id: Option<String> = match (timer_id, interval_id) {
            (Some(t), _) => Some(t.to_string()),
            (None, Some(interval)) => self.timer_for(interval).ok().flatten(),
            (None, None) => None,
        };
        let interval_id: Option<String> = match (interval_id, timer_id.as_deref()) {
            (Some(e), _) => Some(e.to_string()),
            (None, Some(timer)) => self.record(timer).ok().flatten().map(|r| r.interval_id),
            (None, None) => None,
        };

        let mut first_err = None;
        if let Some(interval) = &interval_id
            && let Err(e) = self.store.delete(&Self::timer_key(interval))
        {
            first_err = Some(e);
        }
        if let Some(timer) = &timer_id
            && let Err(e) = self.store.delete(&Self::record_key(timer))
            && first_err.is_none()
        {
            first_err = Some(e);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolve the paired interval id, then delete both projections.
    pub fn delete_by_timer_id(&self, timer_id: &str) -> Result<(), StoreError> {
        self.delete(None, Some(timer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> (TimerRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (TimerRegistry::new(store.clone()), store)
    }

    #[test]
    fn put_populates_both_projections() {
        let (reg, _) = registry();
        reg.put("evt-1", "t-1", 5000).unwrap();
        assert_eq!(reg.timer_for("evt-1").unwrap(), Some("t-1".into()));
        let rec = reg.record("t-1").unwrap().unwrap();
        assert_eq!(rec.interval_id, "evt-1");
        assert_eq!(rec.interval_end, 5000);
    }

    #[test]
    fn delete_with_both_keys_clears_both() {
        let (reg, store) = registry();
        reg.put("evt-1", "t-1", 5000).unwrap();
        reg.delete(Some("evt-1"), Some("t-1")).unwrap();
        assert_eq!(reg.timer_for("evt-1").unwrap(), None);
        assert!(reg.record("t-1").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn delete_by_interval_cross_clears_record() {
        let (reg, _) = registry();
        reg.put("evt-1", "t-1", 5000).unwrap();
        reg.delete(Some("evt-1"), None).unwrap();
        assert_eq!(reg.timer_for("evt-1").unwrap(), None);
        assert!(reg.record("t-1").unwrap().is_none());
    }

    #[test]
    fn delete_by_timer_id_resolves_pair() {
        let (reg, store) = registry();
        reg.put("evt-1", "t-1", 5000).unwrap();
        reg.delete_by_timer_id("t-1").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn delete_absent_is_noop() {
        let (reg, _) = registry();
        reg.delete(Some("ghost"), Some("ghost-timer")).unwrap();
        reg.delete(None, None).unwrap();
        reg.delete_by_timer_id("ghost-timer").unwrap();
    }

    #[test]
    fn delete_clears_known_side_when_counterpart_missing() {
        let (reg, store) = registry();
        // Simulate a diverged store: only the interval→timer projection exists.
        store.set("timerFor/evt-1", "t-1").unwrap();
        reg.delete(Some("evt-1"), None).unwrap();
        assert_eq!(reg.timer_for("evt-1").unwrap(), None);

        // And the other way: only the record side exists.
        reg.put("evt-2", "t-2", 7000).unwrap();
        store.delete("timerFor/evt-2").unwrap();
        reg.delete_by_timer_id("t-2").unwrap();
        assert!(reg.record("t-2").unwrap().is_none());
    }

    #[test]
    fn put_overwrites_existing_record() {
        let (reg, _) = registry();
        reg.put("evt-1", "t-1", 5000).unwrap();
        reg.put("evt-1", "t-2", 9000).unwrap();
        assert_eq!(reg.timer_for("evt-1").unwrap(), Some("t-2".into()));
        assert_eq!(reg.record("t-2").unwrap().unwrap().interval_end, 9000);
    }
}
