use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use presage::engine::{Engine, EngineConfig};
use presage::source::{EventSource, FileSource, content_token};
use presage::status::{LogPresenter, StatusPresenter};
use presage::store::FileStore;
use presage::timers::{FiredTimer, HandlerClass, HostTimers};

/// Slots held back from the planner for the reload timer and the change
/// subscription.
const RESERVED_TIMERS: usize = 2;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = env_parse("PRESAGE_METRICS_PORT");
    presage::observability::init(metrics_port);

    let schedule = std::env::var("PRESAGE_SCHEDULE").unwrap_or_else(|_| "./schedule.json".into());
    let state = std::env::var("PRESAGE_STATE").unwrap_or_else(|_| "./presage-state.json".into());
    let max_timers: usize = env_parse("PRESAGE_MAX_TIMERS").unwrap_or(20);
    let poll_seconds: u64 = env_parse("PRESAGE_POLL_SECONDS").unwrap_or(30);

    let mut cfg = EngineConfig::default();
    if let Some(v) = env_parse("PRESAGE_WINDOW_HOURS") {
        cfg.window_hours = v;
    }
    if let Some(v) = env_parse("PRESAGE_TOLERANCE_MINUTES") {
        cfg.tolerance_minutes = v;
    }
    if let Some(v) = env_parse("PRESAGE_LEAD_MINUTES") {
        cfg.lead_minutes = v;
    }
    if let Some(v) = env_parse("PRESAGE_LOCK_WAIT_MS") {
        cfg.lock_wait_ms = v;
    }
    cfg.timer_quota = env_parse("PRESAGE_TIMER_QUOTA")
        .unwrap_or(max_timers.saturating_sub(RESERVED_TIMERS));

    let store = Arc::new(FileStore::open(&state)?);
    let source = Arc::new(FileSource::new(&schedule));
    let scope = source.scope();
    let (timers, mut fired_rx) = HostTimers::new(max_timers);
    let presenter = Arc::new(LogPresenter::new());

    let engine = Arc::new(Engine::new(
        source,
        timers.clone(),
        presenter.clone(),
        store,
        cfg.clone(),
    ));

    info!("presage starting");
    info!("  schedule: {schedule}");
    info!("  state: {state}");
    info!("  max_timers: {max_timers} (planner quota {})", cfg.timer_quota);
    info!(
        "  window: {}h, tolerance: {}min, lead: {}min",
        cfg.window_hours, cfg.tolerance_minutes, cfg.lead_minutes
    );

    engine.trigger_full_reload().await?;

    // Watch the schedule file and fire the change subscription when its
    // contents change, standing in for calendar push notifications.
    let watch_timers = timers.clone();
    let watch_path = schedule.clone();
    tokio::spawn(async move {
        let mut last: Option<String> = None;
        let mut ticker = tokio::time::interval(Duration::from_secs(poll_seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Ok(bytes) = tokio::fs::read(&watch_path).await else {
                continue;
            };
            let token = content_token(&bytes);
            if let Some(prev) = &last
                && prev != &token
            {
                info!("schedule file changed, notifying subscriptions");
                watch_timers.notify_change(&scope).await;
            }
            last = Some(token);
        }
    });

    // Graceful shutdown: stop dispatching on SIGTERM/ctrl-c.
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            fired = fired_rx.recv() => {
                let Some(FiredTimer { timer_id, class }) = fired else { break };
                let engine = engine.clone();
                tokio::spawn(async move {
                    let result = match class {
                        HandlerClass::IntervalStart => engine.on_timer_fire(&timer_id).await,
                        HandlerClass::Reload => engine.trigger_full_reload().await,
                        HandlerClass::ChangeSync => engine.trigger_sync().await,
                    };
                    if let Err(e) = result {
                        // Degrades to "try again on the next scheduled trigger".
                        error!("{} handler failed: {e}", class.label());
                    }
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Leave no phantom busy flag behind.
    if let Err(e) = presenter.clear_busy().await {
        warn!("could not clear status on shutdown: {e}");
    }
    info!("presage stopped");
    Ok(())
}
