mod analyzer;
mod config;
mod model;
mod monitor;
mod observer;
mod parser;
mod scraper;
mod storage;
mod utils;

use analyzer::{Analyzer, TrendAnalyzer};
use config::{load_config, AppConfig};
use model::SortOrder;
use monitor::FlowMonitor;
use observer::LogObserver;
use parser::FlowParser;
use scraper::{HttpTransport, PageFetcher};
use storage::{SnapshotStore, SqliteSink};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Set panic hook to log details about any panic
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("😱 Panic occurred: {:?}", panic_info);
    }));

    // Load configuration from file, falling back to defaults
    let config = match load_config("config.json") {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Config load failed ({e}), running with defaults");
            AppConfig::default()
        }
    };

    let transport = match HttpTransport::new(config.base_url.clone(), config.request_timeout()) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            error!("Failed to build HTTP transport: {e}");
            return;
        }
    };
    let fetcher = PageFetcher::new(
        transport,
        config.concurrency,
        config.retry_attempts,
        config.retry_backoff(),
    );

    // Snapshot history shared between the monitor and the final digest
    let store = Arc::new(RwLock::new(SnapshotStore::new(
        config.history_limit,
        config.history_max_age(),
        config.tracked_fields.clone(),
    )));

    let mut monitor = FlowMonitor::new(
        fetcher,
        Box::new(FlowParser::new()),
        store.clone(),
        config.query(),
        config.poll_interval(),
    );

    monitor.add_observer(Arc::new(LogObserver::new()));

    let sqlite_sink = match &config.db_path {
        Some(path) => match SqliteSink::new(path) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                monitor.add_observer(sink.clone());
                info!("Persisting changed snapshots to {path}");
                Some(sink)
            }
            Err(e) => {
                error!("Failed to open snapshot database: {e}");
                return;
            }
        },
        None => None,
    };

    monitor.start();
    info!("🚀 capflow-radar started ({}), press Ctrl+C to stop", config.query().describe());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown requested, finishing current cycle...");

    monitor.stop().await;

    log_trend_digest(&config, &store).await;

    if let Some(sink) = sqlite_sink {
        match sink.stored_snapshots() {
            Ok(count) => info!("💾 {count} snapshot(s) persisted in total"),
            Err(e) => warn!("Could not count persisted snapshots: {e}"),
        }
    }

    info!("👋 Done");
}

/// Summarizes the run from whatever history is in the store: market
/// breadth, the strongest flows in both directions and multi-day
/// streaks.
async fn log_trend_digest(config: &AppConfig, store: &Arc<RwLock<SnapshotStore>>) {
    let analyzer = TrendAnalyzer::new();
    let store = store.read().await;

    let Some(snapshot) = store.latest() else {
        info!("No snapshots captured this run");
        return;
    };
    if snapshot.is_empty() {
        info!("Latest snapshot has no records");
        return;
    }

    let summary = analyzer.market_summary(&snapshot);
    info!(
        "Market: {} records, {} rising / {} falling / {} flat, sentiment {:+.4}",
        summary.total_records, summary.rising, summary.falling, summary.flat, summary.sentiment
    );
    info!(
        "Main flow: {} inflow / {} outflow, total {} mean {}",
        summary.inflow_count,
        summary.outflow_count,
        summary.total_main_inflow,
        summary.mean_main_inflow
    );

    let leaders = analyzer.top_by_field(
        &snapshot,
        config.sort_field,
        SortOrder::Descending,
        config.top_k,
    );
    for record in leaders.iter().take(5) {
        info!(
            "  ⬆ {} {}: {}",
            record.code,
            record.name,
            record.field(config.sort_field)
        );
    }

    let laggards = analyzer.top_by_field(
        &snapshot,
        config.sort_field,
        SortOrder::Ascending,
        config.top_k,
    );
    for record in laggards.iter().take(5) {
        info!(
            "  ⬇ {} {}: {}",
            record.code,
            record.name,
            record.field(config.sort_field)
        );
    }

    let history = store.history(config.history_limit);
    let streaks = analyzer.continuous_inflow(&history, config.sort_field, config.streak_days);
    if streaks.is_empty() {
        info!("No {}-day continuous inflow streaks", config.streak_days);
    } else {
        for streak in streaks.iter().take(5) {
            info!(
                "  🔥 {} {}: {:.2} over {} days (avg {:.2}/day)",
                streak.code, streak.name, streak.cumulative, streak.days, streak.daily_average
            );
        }
    }
}
