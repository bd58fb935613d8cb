// Turns the provider's positional item strings into typed flow records.
use crate::model::{FlowRecord, FlowValue, RawPage, RecordParseError};
use crate::utils::round2;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Marker the provider emits for values it does not have.
const SENTINEL: &str = "-";
const ITEM_DELIMITER: char = ',';

/// Amounts arrive in yuan. We keep them in units of 10k yuan so they
/// stay readable next to the ratios.
const AMOUNT_SCALE: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Code,
    Name,
    Price,
    Percent,
    Lots,
    Amount,
    Timestamp,
}

/// Positional layout of one item string. Order here is the order the
/// `fields` request parameter asks for, so request and parse cannot
/// drift apart.
pub const FIELD_TABLE: [(&str, FieldKind); 17] = [
    ("f12", FieldKind::Code),
    ("f14", FieldKind::Name),
    ("f2", FieldKind::Price),
    ("f3", FieldKind::Percent),
    ("f5", FieldKind::Lots),
    ("f6", FieldKind::Amount),
    ("f62", FieldKind::Amount),
    ("f184", FieldKind::Percent),
    ("f66", FieldKind::Amount),
    ("f69", FieldKind::Percent),
    ("f72", FieldKind::Amount),
    ("f75", FieldKind::Percent),
    ("f78", FieldKind::Amount),
    ("f81", FieldKind::Percent),
    ("f84", FieldKind::Amount),
    ("f87", FieldKind::Percent),
    ("f124", FieldKind::Timestamp),
];

pub fn field_codes() -> impl Iterator<Item = &'static str> {
    FIELD_TABLE.iter().map(|(code, _)| *code)
}

#[derive(Debug, Default)]
pub struct ParsedPage {
    pub records: Vec<FlowRecord>,
    pub failures: usize,
}

pub trait Parser: Send + Sync {
    fn parse_page(&self, page: &RawPage, captured_at: DateTime<Utc>) -> ParsedPage;
}

pub struct FlowParser;

impl FlowParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_item(
        item: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<FlowRecord, RecordParseError> {
        let parts: Vec<&str> = item.split(ITEM_DELIMITER).collect();
        if parts.len() != FIELD_TABLE.len() {
            return Err(RecordParseError::FieldCount {
                got: parts.len(),
                want: FIELD_TABLE.len(),
            });
        }

        let mut record = FlowRecord {
            code: String::new(),
            name: String::new(),
            price: FlowValue::Unknown,
            pct_change: FlowValue::Unknown,
            volume: FlowValue::Unknown,
            turnover: FlowValue::Unknown,
            main_inflow: FlowValue::Unknown,
            main_ratio: FlowValue::Unknown,
            huge_inflow: FlowValue::Unknown,
            huge_ratio: FlowValue::Unknown,
            large_inflow: FlowValue::Unknown,
            large_ratio: FlowValue::Unknown,
            medium_inflow: FlowValue::Unknown,
            medium_ratio: FlowValue::Unknown,
            small_inflow: FlowValue::Unknown,
            small_ratio: FlowValue::Unknown,
            updated_at: None,
            captured_at,
        };

        for ((code, kind), raw) in FIELD_TABLE.iter().zip(parts) {
            let raw = raw.trim();
            match kind {
                // A sentinel code or name counts as missing, not as a value.
                FieldKind::Code if raw != SENTINEL => record.code = raw.to_string(),
                FieldKind::Name if raw != SENTINEL => record.name = raw.to_string(),
                FieldKind::Code | FieldKind::Name => {}
                FieldKind::Timestamp => record.updated_at = parse_timestamp(raw),
                FieldKind::Price | FieldKind::Percent | FieldKind::Lots | FieldKind::Amount => {
                    let value = match kind {
                        FieldKind::Lots => parse_number(raw),
                        FieldKind::Amount => parse_amount(raw),
                        _ => parse_rounded(raw),
                    };
                    match *code {
                        "f2" => record.price = value,
                        "f3" => record.pct_change = value,
                        "f5" => record.volume = value,
                        "f6" => record.turnover = value,
                        "f62" => record.main_inflow = value,
                        "f184" => record.main_ratio = value,
                        "f66" => record.huge_inflow = value,
                        "f69" => record.huge_ratio = value,
                        "f72" => record.large_inflow = value,
                        "f75" => record.large_ratio = value,
                        "f78" => record.medium_inflow = value,
                        "f81" => record.medium_ratio = value,
                        "f84" => record.small_inflow = value,
                        "f87" => record.small_ratio = value,
                        _ => {}
                    }
                }
            }
        }

        if record.code.is_empty() {
            return Err(RecordParseError::MissingCode);
        }
        if record.name.is_empty() {
            return Err(RecordParseError::MissingName);
        }

        Ok(record)
    }
}

impl Parser for FlowParser {
    fn parse_page(&self, page: &RawPage, captured_at: DateTime<Utc>) -> ParsedPage {
        let mut parsed = ParsedPage::default();

        for item in &page.items {
            match Self::parse_item(item, captured_at) {
                Ok(record) => parsed.records.push(record),
                Err(e) => {
                    debug!("page {}: dropping item ({e}): {item:.60}", page.index);
                    parsed.failures += 1;
                }
            }
        }

        parsed
    }
}

/// Missing marker, empty, unparseable or non-finite input all land on
/// [`FlowValue::Unknown`]. Zero is a real value and never a fallback.
fn parse_number(raw: &str) -> FlowValue {
    if raw.is_empty() || raw == SENTINEL {
        return FlowValue::Unknown;
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => FlowValue::Known(v),
        _ => FlowValue::Unknown,
    }
}

fn parse_rounded(raw: &str) -> FlowValue {
    match parse_number(raw) {
        FlowValue::Known(v) => FlowValue::Known(round2(v)),
        unknown => unknown,
    }
}

fn parse_amount(raw: &str) -> FlowValue {
    match parse_number(raw) {
        FlowValue::Known(v) => FlowValue::Known(round2(v / AMOUNT_SCALE)),
        unknown => unknown,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() || raw == SENTINEL {
        return None;
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured() -> DateTime<Utc> {
        DateTime::from_timestamp(1_721_613_600, 0).unwrap()
    }

    fn item(code: &str, name: &str) -> String {
        format!(
            "{code},{name},1700.51,2.345,12345,98765432,12345678,5.678,8000000,3.2,4345678,2.478,-3000000,-1.1,500000,0.9,1721613300"
        )
    }

    #[test]
    fn well_formed_item_maps_every_field() {
        let record = FlowParser::parse_item(&item("600519", "贵州茅台"), captured()).unwrap();

        assert_eq!(record.code, "600519");
        assert_eq!(record.name, "贵州茅台");
        assert_eq!(record.price, FlowValue::Known(1700.51));
        assert_eq!(record.pct_change, FlowValue::Known(2.35));
        assert_eq!(record.volume, FlowValue::Known(12345.0));
        assert_eq!(record.turnover, FlowValue::Known(9876.54));
        assert_eq!(record.main_inflow, FlowValue::Known(1234.57));
        assert_eq!(record.main_ratio, FlowValue::Known(5.68));
        assert_eq!(record.huge_inflow, FlowValue::Known(800.0));
        assert_eq!(record.medium_inflow, FlowValue::Known(-300.0));
        assert_eq!(record.medium_ratio, FlowValue::Known(-1.1));
        assert_eq!(record.small_inflow, FlowValue::Known(50.0));
        assert_eq!(
            record.updated_at,
            Some(DateTime::from_timestamp(1_721_613_300, 0).unwrap())
        );
        assert_eq!(record.captured_at, captured());
    }

    #[test]
    fn sentinel_and_blank_stay_unknown_not_zero() {
        let raw = "000001,平安银行,-,,-,-,-,-,-,-,-,-,-,-,-,-,-";
        let record = FlowParser::parse_item(raw, captured()).unwrap();

        assert_eq!(record.price, FlowValue::Unknown);
        assert_eq!(record.pct_change, FlowValue::Unknown);
        assert_eq!(record.main_inflow, FlowValue::Unknown);
        assert_ne!(record.main_inflow, FlowValue::Known(0.0));
        assert_eq!(record.updated_at, None);
    }

    #[test]
    fn garbage_numeric_field_is_unknown() {
        let raw = "000002,万科A,abc,2.0,1,1,NaN,1,1,1,1,1,1,1,1,1,1721613300";
        let record = FlowParser::parse_item(raw, captured()).unwrap();

        assert_eq!(record.price, FlowValue::Unknown);
        assert_eq!(record.main_inflow, FlowValue::Unknown);
        assert_eq!(record.pct_change, FlowValue::Known(2.0));
    }

    #[test]
    fn blank_code_rejects_item() {
        let raw = item("", "无名");
        let err = FlowParser::parse_item(&raw, captured()).unwrap_err();
        assert_eq!(err, RecordParseError::MissingCode);
    }

    #[test]
    fn sentinel_code_rejects_item() {
        let raw = item("-", "无名");
        let err = FlowParser::parse_item(&raw, captured()).unwrap_err();
        assert_eq!(err, RecordParseError::MissingCode);
    }

    #[test]
    fn wrong_field_count_rejects_item() {
        let err = FlowParser::parse_item("600519,贵州茅台,1700.51", captured()).unwrap_err();
        assert_eq!(
            err,
            RecordParseError::FieldCount {
                got: 3,
                want: FIELD_TABLE.len()
            }
        );
    }

    #[test]
    fn page_keeps_good_items_and_counts_bad_ones() {
        let page = RawPage {
            index: 1,
            total: 3,
            items: vec![
                item("600519", "贵州茅台"),
                "short,row".to_string(),
                item("000001", "平安银行"),
            ],
        };

        let parsed = FlowParser::new().parse_page(&page, captured());

        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.failures, 1);
        assert_eq!(parsed.records[0].code, "600519");
        assert_eq!(parsed.records[1].code, "000001");
    }

    #[test]
    fn request_field_order_matches_table() {
        let codes: Vec<_> = field_codes().collect();
        assert_eq!(codes.len(), 17);
        assert_eq!(codes[0], "f12");
        assert_eq!(codes[1], "f14");
        assert_eq!(codes[16], "f124");
    }
}
