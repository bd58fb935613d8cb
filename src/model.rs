// Core data model: flow records, snapshots, queries, fetch outcomes, errors.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A numeric field as reported by the provider. `Known(0.0)` is a real
/// zero; `Unknown` is the provider's "no data" sentinel and must never
/// be collapsed into zero by downstream consumers.
/// Invariant: `Known` never holds a non-finite value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowValue {
    Known(f64),
    Unknown,
}

impl FlowValue {
    pub fn known(self) -> Option<f64> {
        match self {
            FlowValue::Known(v) => Some(v),
            FlowValue::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, FlowValue::Known(_))
    }

    /// True only for a known, strictly positive value.
    pub fn is_positive(&self) -> bool {
        matches!(self, FlowValue::Known(v) if *v > 0.0)
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, FlowValue::Known(v) if *v < 0.0)
    }
}

impl std::fmt::Display for FlowValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowValue::Known(v) => write!(f, "{:.2}", v),
            FlowValue::Unknown => write!(f, "-"),
        }
    }
}

/// One normalized capital-flow record. Amounts are in 万元 (ten
/// thousand yuan), ratios and percent change in percent, volume in
/// lots. `code` is the stable identifier and is unique within a
/// snapshot.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub code: String,
    pub name: String,
    pub price: FlowValue,
    pub pct_change: FlowValue,
    pub volume: FlowValue,
    pub turnover: FlowValue,
    pub main_inflow: FlowValue,
    pub main_ratio: FlowValue,
    pub huge_inflow: FlowValue,
    pub huge_ratio: FlowValue,
    pub large_inflow: FlowValue,
    pub large_ratio: FlowValue,
    pub medium_inflow: FlowValue,
    pub medium_ratio: FlowValue,
    pub small_inflow: FlowValue,
    pub small_ratio: FlowValue,
    /// Provider-side update time (f124), when reported.
    pub updated_at: Option<DateTime<Utc>>,
    pub captured_at: DateTime<Utc>,
}

impl FlowRecord {
    /// Typed accessor for the numeric field a `SortField` names.
    pub fn field(&self, field: SortField) -> FlowValue {
        match field {
            SortField::Price => self.price,
            SortField::PctChange => self.pct_change,
            SortField::Volume => self.volume,
            SortField::Turnover => self.turnover,
            SortField::MainInflow => self.main_inflow,
            SortField::MainRatio => self.main_ratio,
            SortField::HugeInflow => self.huge_inflow,
            SortField::HugeRatio => self.huge_ratio,
            SortField::LargeInflow => self.large_inflow,
            SortField::LargeRatio => self.large_ratio,
            SortField::MediumInflow => self.medium_inflow,
            SortField::MediumRatio => self.medium_ratio,
            SortField::SmallInflow => self.small_inflow,
            SortField::SmallRatio => self.small_ratio,
        }
    }
}

/// Which slice of the market a query targets. Maps to the provider's
/// `fs` filter parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSegment {
    #[default]
    AllStocks,
    MainBoard,
    Gem,
    Star,
    Bse,
    Industry,
    Concept,
}

impl MarketSegment {
    pub fn filter_code(&self) -> &'static str {
        match self {
            MarketSegment::AllStocks => {
                "m:0+t:6+f:!2,m:0+t:13+f:!2,m:0+t:80+f:!2,m:1+t:2+f:!2,m:1+t:23+f:!2,m:0+t:7+f:!2,m:1+t:3+f:!2"
            }
            MarketSegment::MainBoard => "m:1+t:2,m:1+t:23",
            MarketSegment::Gem => "m:0+t:80",
            MarketSegment::Star => "m:1+t:23",
            MarketSegment::Bse => "m:0+t:81",
            MarketSegment::Industry => "m:90+t:2",
            MarketSegment::Concept => "m:90+t:3",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MarketSegment::AllStocks => "all_stocks",
            MarketSegment::MainBoard => "main_board",
            MarketSegment::Gem => "gem",
            MarketSegment::Star => "star",
            MarketSegment::Bse => "bse",
            MarketSegment::Industry => "industry",
            MarketSegment::Concept => "concept",
        }
    }
}

/// Sortable numeric fields. Doubles as the provider-side sort key
/// (`fid`) and as the local field selector for top-K and change
/// tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Price,
    PctChange,
    Volume,
    Turnover,
    #[default]
    MainInflow,
    MainRatio,
    HugeInflow,
    HugeRatio,
    LargeInflow,
    LargeRatio,
    MediumInflow,
    MediumRatio,
    SmallInflow,
    SmallRatio,
}

impl SortField {
    pub fn provider_code(&self) -> &'static str {
        match self {
            SortField::Price => "f2",
            SortField::PctChange => "f3",
            SortField::Volume => "f5",
            SortField::Turnover => "f6",
            SortField::MainInflow => "f62",
            SortField::MainRatio => "f184",
            SortField::HugeInflow => "f66",
            SortField::HugeRatio => "f69",
            SortField::LargeInflow => "f72",
            SortField::LargeRatio => "f75",
            SortField::MediumInflow => "f78",
            SortField::MediumRatio => "f81",
            SortField::SmallInflow => "f84",
            SortField::SmallRatio => "f87",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Descending,
    Ascending,
}

impl SortOrder {
    /// Provider `po` parameter value.
    pub fn provider_code(&self) -> &'static str {
        match self {
            SortOrder::Descending => "1",
            SortOrder::Ascending => "0",
        }
    }
}

/// Everything that identifies one fetch: which segment, how sorted,
/// how paginated. Stored on the resulting snapshot as its source
/// descriptor.
#[derive(Debug, Clone)]
pub struct FlowQuery {
    pub segment: MarketSegment,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
    pub page_size: u32,
    /// Upper bound on pages per cycle. `None` fetches everything the
    /// provider reports.
    pub max_pages: Option<u32>,
}

impl Default for FlowQuery {
    fn default() -> Self {
        Self {
            segment: MarketSegment::default(),
            sort_field: SortField::default(),
            sort_order: SortOrder::default(),
            page_size: 100,
            max_pages: Some(10),
        }
    }
}

impl FlowQuery {
    pub fn describe(&self) -> String {
        let order = match self.sort_order {
            SortOrder::Descending => "desc",
            SortOrder::Ascending => "asc",
        };
        format!(
            "{}/{} {} pz{}",
            self.segment.label(),
            self.sort_field.provider_code(),
            order,
            self.page_size
        )
    }
}

/// One undecoded page as returned by the transport: the provider's
/// authoritative total for the query plus the raw item strings.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub index: u32,
    pub total: u64,
    pub items: Vec<String>,
}

/// The full record set captured at one point in time. Immutable once
/// published to the store.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    pub query: FlowQuery,
    pub records: Vec<FlowRecord>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&FlowRecord> {
        self.records.iter().find(|r| r.code == code)
    }
}

#[derive(Debug, Clone)]
pub struct FailedPage {
    pub index: u32,
    pub cause: String,
}

/// Book-keeping for one fetch cycle: what the provider reported, what
/// actually arrived and what was dropped on the way.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub reported_total: u64,
    pub pages_planned: u32,
    pub pages_fetched: usize,
    pub failed_pages: Vec<FailedPage>,
    pub parsed_records: usize,
    pub parse_failures: usize,
    pub duplicates: usize,
}

impl FetchOutcome {
    /// True when at least one page failed while others succeeded.
    pub fn is_partial(&self) -> bool {
        !self.failed_pages.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("provider returned no data section")]
    EmptyData,
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Page 1 exhausted its retry budget, so neither the authoritative
    /// total nor any records are available for this cycle.
    #[error("no pages fetched: page 1 failed after {attempts} attempts: {cause}")]
    NoPages {
        attempts: u32,
        #[source]
        cause: TransportError,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordParseError {
    #[error("field count mismatch: got {got}, want {want}")]
    FieldCount { got: usize, want: usize },
    #[error("missing identifier code")]
    MissingCode,
    #[error("missing display name")]
    MissingName,
}

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("database error: {0}")]
    Database(String),
    #[error("{0}")]
    Other(String),
}
