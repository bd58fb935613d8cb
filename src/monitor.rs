use crate::model::{FetchError, FetchOutcome, FlowQuery, Snapshot};
use crate::observer::SnapshotObserver;
use crate::parser::Parser;
use crate::scraper::PageFetcher;
use crate::storage::{PublishOutcome, SnapshotStore};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl MonitorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => MonitorState::Running,
            2 => MonitorState::Stopping,
            _ => MonitorState::Idle,
        }
    }
}

/// What one poll cycle produced. `snapshot` is `None` only when the
/// store rejected the capture as stale.
#[derive(Debug)]
pub struct CycleReport {
    pub snapshot: Option<Arc<Snapshot>>,
    pub outcome: FetchOutcome,
    pub changed: bool,
}

struct CycleContext {
    fetcher: PageFetcher,
    parser: Box<dyn Parser>,
    store: Arc<RwLock<SnapshotStore>>,
    observers: std::sync::RwLock<Vec<Arc<dyn SnapshotObserver>>>,
    query: FlowQuery,
    state: AtomicU8,
}

struct Runner {
    handle: JoinHandle<()>,
    stop_notify: Arc<Notify>,
}

/// Drives the fetch, parse, publish, notify cycle on a fixed interval.
/// Idle until started, one background task while running, back to Idle
/// after `stop` joins the task. The store outlives the monitor's runs,
/// so history accumulates across start/stop pairs.
pub struct FlowMonitor {
    ctx: Arc<CycleContext>,
    interval: Duration,
    runner: Option<Runner>,
}

impl FlowMonitor {
    pub fn new(
        fetcher: PageFetcher,
        parser: Box<dyn Parser>,
        store: Arc<RwLock<SnapshotStore>>,
        query: FlowQuery,
        interval: Duration,
    ) -> Self {
        Self {
            ctx: Arc::new(CycleContext {
                fetcher,
                parser,
                store,
                observers: std::sync::RwLock::new(Vec::new()),
                query,
                state: AtomicU8::new(MonitorState::Idle as u8),
            }),
            interval,
            runner: None,
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn SnapshotObserver>) {
        match self.ctx.observers.write() {
            Ok(mut guard) => guard.push(observer),
            Err(_) => warn!("observer list lock poisoned, observer dropped"),
        }
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.ctx.state.load(Ordering::SeqCst))
    }

    pub fn store(&self) -> Arc<RwLock<SnapshotStore>> {
        Arc::clone(&self.ctx.store)
    }

    /// Spawns the polling loop. Returns false without side effects when
    /// the monitor is not idle.
    pub fn start(&mut self) -> bool {
        if self.state() != MonitorState::Idle {
            warn!("start ignored, monitor is already active");
            return false;
        }

        self.ctx
            .state
            .store(MonitorState::Running as u8, Ordering::SeqCst);

        // A fresh Notify per run, so a stray permit from a previous
        // stop cannot leak into this one.
        let stop_notify = Arc::new(Notify::new());
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.ctx),
            self.interval,
            Arc::clone(&stop_notify),
        ));
        self.runner = Some(Runner {
            handle,
            stop_notify,
        });

        info!(
            "monitor started: {} every {:?}",
            self.ctx.query.describe(),
            self.interval
        );
        true
    }

    /// Requests the loop to exit, waits for it, then returns to Idle.
    /// A cycle in flight finishes first.
    pub async fn stop(&mut self) {
        let Some(runner) = self.runner.take() else {
            debug!("stop requested but monitor is not running");
            return;
        };

        self.ctx
            .state
            .store(MonitorState::Stopping as u8, Ordering::SeqCst);
        runner.stop_notify.notify_one();

        if let Err(e) = runner.handle.await {
            error!("monitor task ended abnormally: {e}");
        }

        self.ctx
            .state
            .store(MonitorState::Idle as u8, Ordering::SeqCst);
        info!("monitor stopped");
    }

    /// Runs exactly one cycle outside the polling loop.
    pub async fn fetch_once(&self) -> Result<CycleReport, FetchError> {
        run_cycle(&self.ctx).await
    }
}

async fn run_loop(ctx: Arc<CycleContext>, interval: Duration, stop_notify: Arc<Notify>) {
    debug!("monitor loop entered");
    loop {
        if MonitorState::from_u8(ctx.state.load(Ordering::SeqCst)) != MonitorState::Running {
            break;
        }

        let started = Instant::now();
        match run_cycle(&ctx).await {
            Ok(report) => {
                info!(
                    "cycle done in {:?}: {} records, {} of {} pages, changed={}",
                    started.elapsed(),
                    report.outcome.parsed_records,
                    report.outcome.pages_fetched,
                    report.outcome.pages_planned,
                    report.changed
                );
            }
            Err(e) => {
                error!("cycle produced no snapshot: {e}");
                notify_cycle_error(&ctx, &e).await;
            }
        }

        if MonitorState::from_u8(ctx.state.load(Ordering::SeqCst)) != MonitorState::Running {
            break;
        }

        let wait = interval.saturating_sub(started.elapsed());
        if wait.is_zero() {
            continue;
        }
        tokio::select! {
            _ = sleep(wait) => {}
            _ = stop_notify.notified() => break,
        }
    }
    debug!("monitor loop exited");
}

async fn run_cycle(ctx: &CycleContext) -> Result<CycleReport, FetchError> {
    let (pages, mut outcome) = ctx.fetcher.fetch_all(&ctx.query).await?;
    let captured_at = Utc::now();

    let mut records = Vec::new();
    let mut parse_failures = 0usize;
    for page in &pages {
        let parsed = ctx.parser.parse_page(page, captured_at);
        records.extend(parsed.records);
        parse_failures += parsed.failures;
    }

    // Pages can overlap while the provider re-sorts between requests.
    // First occurrence wins.
    let mut seen = HashSet::new();
    let mut duplicates = 0usize;
    records.retain(|r| {
        if seen.insert(r.code.clone()) {
            true
        } else {
            duplicates += 1;
            false
        }
    });

    outcome.parsed_records = records.len();
    outcome.parse_failures = parse_failures;
    outcome.duplicates = duplicates;
    if outcome.is_partial() {
        warn!(
            "partial snapshot: {} of {} pages (provider total {})",
            outcome.pages_fetched, outcome.pages_planned, outcome.reported_total
        );
        for failed in &outcome.failed_pages {
            debug!("page {} lost: {}", failed.index, failed.cause);
        }
    }

    let snapshot = Snapshot {
        captured_at,
        query: ctx.query.clone(),
        records,
    };

    let publish = ctx.store.write().await.publish(snapshot);
    match publish {
        PublishOutcome::Stored { snapshot, changed } => {
            if changed {
                notify_observers(ctx, &snapshot).await;
            }
            Ok(CycleReport {
                snapshot: Some(snapshot),
                outcome,
                changed,
            })
        }
        PublishOutcome::RejectedStale => {
            warn!("snapshot rejected as stale, keeping previous");
            Ok(CycleReport {
                snapshot: None,
                outcome,
                changed: false,
            })
        }
    }
}

async fn notify_observers(ctx: &CycleContext, snapshot: &Arc<Snapshot>) {
    let observers: Vec<Arc<dyn SnapshotObserver>> = match ctx.observers.read() {
        Ok(guard) => guard.clone(),
        Err(_) => {
            warn!("observer list lock poisoned, skipping notifications");
            return;
        }
    };

    for observer in observers {
        if let Err(e) = observer.on_snapshot(snapshot).await {
            warn!("observer '{}' failed: {e}", observer.name());
        }
    }
}

async fn notify_cycle_error(ctx: &CycleContext, error: &FetchError) {
    let observers: Vec<Arc<dyn SnapshotObserver>> = match ctx.observers.read() {
        Ok(guard) => guard.clone(),
        Err(_) => return,
    };

    for observer in observers {
        observer.on_cycle_error(error).await;
    }
}
