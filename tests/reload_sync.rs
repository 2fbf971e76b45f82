use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;

use presage::engine::{Engine, EngineConfig};
use presage::model::{Interval, Ms, hours_to_ms, minutes_to_ms, now_ms};
use presage::source::{ChangeBatch, EventSource, IntervalPage, SourceError};
use presage::status::{PresenterError, StatusPresenter};
use presage::store::MemoryStore;
use presage::timers::{FiredTimer, HandlerClass, HostTimers};

// ── Test infrastructure ──────────────────────────────────────

/// Calendar whose interval set and change feed are driven by the test.
struct ScriptedCalendar {
    intervals: StdMutex<Vec<Interval>>,
    token: StdMutex<String>,
    changes: StdMutex<Option<(Vec<Interval>, String)>>,
}

impl ScriptedCalendar {
    fn new(intervals: Vec<Interval>) -> Arc<Self> {
        Arc::new(Self {
            intervals: StdMutex::new(intervals),
            token: StdMutex::new("gen-1".into()),
            changes: StdMutex::new(None),
        })
    }

    fn replace_intervals(&self, intervals: Vec<Interval>, token: &str) {
        *self.intervals.lock().unwrap() = intervals;
        *self.token.lock().unwrap() = token.to_string();
    }

    fn script_changes(&self, changed: Vec<Interval>, next_token: &str) {
        *self.changes.lock().unwrap() = Some((changed, next_token.to_string()));
    }
}

#[async_trait]
impl EventSource for ScriptedCalendar {
    fn scope(&self) -> String {
        "scripted-calendar".into()
    }

    async fn list_intervals(
        &self,
        _scope: &str,
        _window_start: Ms,
        _window_end: Ms,
        _page: Option<&str>,
    ) -> Result<IntervalPage, SourceError> {
        Ok(IntervalPage {
            intervals: self.intervals.lock().unwrap().clone(),
            next_page: None,
            sync_token: Some(self.token.lock().unwrap().clone()),
        })
    }

    async fn list_changed(
        &self,
        sync_token: &str,
        _page: Option<&str>,
    ) -> Result<ChangeBatch, SourceError> {
        if sync_token != *self.token.lock().unwrap() {
            return Ok(ChangeBatch::TokenInvalid);
        }
        match self.changes.lock().unwrap().take() {
            Some((intervals, next_token)) => {
                *self.token.lock().unwrap() = next_token.clone();
                Ok(ChangeBatch::Changes {
                    intervals,
                    next_page: None,
                    next_token: Some(next_token),
                })
            }
            None => Ok(ChangeBatch::Changes {
                intervals: Vec::new(),
                next_page: None,
                next_token: Some(sync_token.to_string()),
            }),
        }
    }
}

struct RecordingPresenter {
    busy_calls: StdMutex<Vec<Ms>>,
}

impl RecordingPresenter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            busy_calls: StdMutex::new(Vec::new()),
        })
    }

    fn busy_calls(&self) -> Vec<Ms> {
        self.busy_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusPresenter for RecordingPresenter {
    async fn set_busy(&self, expires_at: Ms) -> Result<(), PresenterError> {
        self.busy_calls.lock().unwrap().push(expires_at);
        Ok(())
    }

    async fn clear_busy(&self) -> Result<(), PresenterError> {
        Ok(())
    }
}

struct TestRig {
    engine: Arc<Engine>,
    calendar: Arc<ScriptedCalendar>,
    timers: Arc<HostTimers>,
    fired_rx: tokio::sync::mpsc::Receiver<FiredTimer>,
    presenter: Arc<RecordingPresenter>,
}

fn start_rig(intervals: Vec<Interval>) -> TestRig {
    let calendar = ScriptedCalendar::new(intervals);
    let (timers, fired_rx) = HostTimers::new(20);
    let presenter = RecordingPresenter::new();
    let store = Arc::new(MemoryStore::new());
    let cfg = EngineConfig {
        lead_minutes: 0,
        ..EngineConfig::default()
    };
    let engine = Arc::new(Engine::new(
        calendar.clone(),
        timers.clone(),
        presenter.clone(),
        store,
        cfg,
    ));
    TestRig {
        engine,
        calendar,
        timers,
        fired_rx,
        presenter,
    }
}

/// Dispatch one fired timer the way the daemon's select loop does.
async fn dispatch(rig: &mut TestRig) -> FiredTimer {
    let fired = rig.fired_rx.recv().await.expect("timer channel closed");
    match fired.class {
        HandlerClass::IntervalStart => rig.engine.on_timer_fire(&fired.timer_id).await.unwrap(),
        HandlerClass::Reload => rig.engine.trigger_full_reload().await.unwrap(),
        HandlerClass::ChangeSync => rig.engine.trigger_sync().await.unwrap(),
    }
    fired
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reload_schedules_and_fires_through_the_host() {
    let base = now_ms();
    let first = Interval::new("morning", base + minutes_to_ms(10), base + minutes_to_ms(40));
    let second = Interval::new("afternoon", base + hours_to_ms(5), base + hours_to_ms(6));
    let mut rig = start_rig(vec![first.clone(), second.clone()]);

    rig.engine.trigger_full_reload().await.unwrap();

    // 2 interval timers + reload timer + change subscription.
    assert_eq!(rig.timers.outstanding(), 4);

    let fired = dispatch(&mut rig).await;
    assert_eq!(fired.class, HandlerClass::IntervalStart);
    assert_eq!(rig.presenter.busy_calls(), vec![first.end]);

    let fired = dispatch(&mut rig).await;
    assert_eq!(fired.class, HandlerClass::IntervalStart);
    assert_eq!(rig.presenter.busy_calls(), vec![first.end, second.end]);

    // Fired timers cleaned their registry records behind them.
    assert_eq!(rig.engine.registry().timer_for("morning").unwrap(), None);
    assert_eq!(rig.engine.registry().timer_for("afternoon").unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn change_notification_replaces_a_moved_interval() {
    let base = now_ms();
    let stable = Interval::new("stable", base + hours_to_ms(1), base + hours_to_ms(2));
    let moved = Interval::new("moved", base + hours_to_ms(4), base + hours_to_ms(5));
    let mut rig = start_rig(vec![stable, moved]);

    rig.engine.trigger_full_reload().await.unwrap();
    let old_timer = rig.engine.registry().timer_for("moved").unwrap().unwrap();

    // The "moved" interval shifts later; the calendar pushes a notification.
    let shifted = Interval::new("moved", base + hours_to_ms(7), base + hours_to_ms(8));
    rig.calendar.script_changes(vec![shifted.clone()], "gen-2");
    rig.timers.notify_change("scripted-calendar").await;

    let fired = dispatch(&mut rig).await;
    assert_eq!(fired.class, HandlerClass::ChangeSync);

    let new_timer = rig.engine.registry().timer_for("moved").unwrap().unwrap();
    assert_ne!(new_timer, old_timer);
    let record = rig.engine.registry().record(&new_timer).unwrap().unwrap();
    assert_eq!(record.interval_end, shifted.end);

    // Replace kept the outstanding count stable.
    assert_eq!(rig.timers.outstanding(), 4);
}

#[tokio::test(start_paused = true)]
async fn stale_token_notification_forces_full_reload() {
    let base = now_ms();
    let original = Interval::new("original", base + hours_to_ms(1), base + hours_to_ms(2));
    let mut rig = start_rig(vec![original]);

    rig.engine.trigger_full_reload().await.unwrap();

    // The calendar regenerates wholesale: the engine's token goes stale and
    // the notification must fall back to a full reload of the new set.
    let replacement = Interval::new("replacement", base + hours_to_ms(3), base + hours_to_ms(4));
    rig.calendar
        .replace_intervals(vec![replacement.clone()], "gen-2");
    rig.timers.notify_change("scripted-calendar").await;

    let fired = dispatch(&mut rig).await;
    assert_eq!(fired.class, HandlerClass::ChangeSync);

    assert_eq!(rig.engine.registry().timer_for("original").unwrap(), None);
    let timer = rig.engine.registry().timer_for("replacement").unwrap().unwrap();
    let record = rig.engine.registry().record(&timer).unwrap().unwrap();
    assert_eq!(record.interval_end, replacement.end);

    // Fresh generation: 1 interval timer + reload + subscription.
    assert_eq!(rig.timers.outstanding(), 3);
}
