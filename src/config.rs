use crate::model::{FlowQuery, MarketSegment, SortField, SortOrder};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Runtime configuration. Every field has a default so a partial (or
/// absent) config file still yields a working setup.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub segment: MarketSegment,
    #[serde(default)]
    pub sort_field: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default = "default_max_pages")]
    pub max_pages: Option<u32>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Optional age bound on retained snapshots, in hours.
    #[serde(default)]
    pub history_max_age_hours: Option<i64>,
    /// Fields compared when deciding whether a snapshot changed.
    #[serde(default = "default_tracked_fields")]
    pub tracked_fields: Vec<SortField>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_streak_days")]
    pub streak_days: usize,
    /// When set, published snapshots are appended to this SQLite file.
    #[serde(default)]
    pub db_path: Option<String>,
}

fn default_base_url() -> String {
    "https://push2.eastmoney.com/api/qt/clist/get".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_concurrency() -> usize {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_max_pages() -> Option<u32> {
    Some(10)
}

fn default_history_limit() -> usize {
    64
}

fn default_tracked_fields() -> Vec<SortField> {
    vec![SortField::MainInflow]
}

fn default_top_k() -> usize {
    20
}

fn default_streak_days() -> usize {
    3
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            base_url: default_base_url(),
            page_size: default_page_size(),
            concurrency: default_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            segment: MarketSegment::default(),
            sort_field: SortField::default(),
            sort_order: SortOrder::default(),
            max_pages: default_max_pages(),
            history_limit: default_history_limit(),
            history_max_age_hours: None,
            tracked_fields: default_tracked_fields(),
            top_k: default_top_k(),
            streak_days: default_streak_days(),
            db_path: None,
        }
    }
}

impl AppConfig {
    pub fn query(&self) -> FlowQuery {
        FlowQuery {
            segment: self.segment,
            sort_field: self.sort_field,
            sort_order: self.sort_order,
            page_size: self.page_size,
            max_pages: self.max_pages,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn history_max_age(&self) -> Option<chrono::Duration> {
        self.history_max_age_hours.map(chrono::Duration::hours)
    }
}

pub fn load_config(path: &str) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: AppConfig = serde_json::from_str("{}").expect("parse empty config");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.max_pages, Some(10));
        assert_eq!(config.segment, MarketSegment::AllStocks);
        assert_eq!(config.sort_field, SortField::MainInflow);
        assert_eq!(config.sort_order, SortOrder::Descending);
        assert_eq!(config.tracked_fields, vec![SortField::MainInflow]);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn overrides_parse() {
        let raw = r#"{
            "segment": "concept",
            "sort_field": "pct_change",
            "sort_order": "ascending",
            "page_size": 50,
            "max_pages": null,
            "poll_interval_secs": 30,
            "tracked_fields": ["main_inflow", "pct_change"],
            "db_path": "flows.db"
        }"#;
        let config: AppConfig = serde_json::from_str(raw).expect("parse overrides");
        assert_eq!(config.segment, MarketSegment::Concept);
        assert_eq!(config.sort_field, SortField::PctChange);
        assert_eq!(config.sort_order, SortOrder::Ascending);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.max_pages, None);
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.tracked_fields.len(), 2);
        assert_eq!(config.db_path.as_deref(), Some("flows.db"));
    }

    #[test]
    fn query_carries_pagination_and_sort() {
        let config = AppConfig::default();
        let query = config.query();
        assert_eq!(query.page_size, 100);
        assert_eq!(query.max_pages, Some(10));
        assert_eq!(query.sort_field, SortField::MainInflow);
    }
}
