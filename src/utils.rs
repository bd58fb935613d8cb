// Utility functions
use chrono::{DateTime, NaiveDate, Utc};

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// UTC calendar day a capture time falls on.
pub fn day_key(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}
