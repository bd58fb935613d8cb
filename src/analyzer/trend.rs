use crate::model::{FlowRecord, FlowValue, Snapshot, SortField, SortOrder};
use crate::utils::{day_key, round2, round4};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// A stock whose tracked flow stayed strictly positive on each of the
/// last `days` trading days present in history.
#[derive(Debug, Clone, PartialEq)]
pub struct InflowStreak {
    pub code: String,
    pub name: String,
    pub price: FlowValue,
    pub pct_change: FlowValue,
    pub days: usize,
    /// Sum of the daily values over the streak window.
    pub cumulative: f64,
    pub daily_average: f64,
}

/// Aggregate view over a single snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSummary {
    pub total_records: usize,
    pub rising: usize,
    pub falling: usize,
    pub flat: usize,
    pub unknown_pct: usize,
    pub inflow_count: usize,
    pub outflow_count: usize,
    pub total_main_inflow: FlowValue,
    pub mean_main_inflow: FlowValue,
    /// (rising - falling) / records with a known percent change, in
    /// [-1, 1]. Zero when nothing is known.
    pub sentiment: f64,
}

pub trait Analyzer: Send + Sync {
    fn top_by_field(
        &self,
        snapshot: &Snapshot,
        field: SortField,
        order: SortOrder,
        k: usize,
    ) -> Vec<FlowRecord>;

    fn continuous_inflow(
        &self,
        history: &[Arc<Snapshot>],
        field: SortField,
        days: usize,
    ) -> Vec<InflowStreak>;

    fn market_summary(&self, snapshot: &Snapshot) -> MarketSummary;
}

pub struct TrendAnalyzer;

impl TrendAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Collapses history to the last snapshot of each UTC day, oldest
    /// day first. History arrives time ordered, so one forward pass is
    /// enough.
    fn last_snapshot_per_day(history: &[Arc<Snapshot>]) -> Vec<(NaiveDate, &Arc<Snapshot>)> {
        let mut daily: Vec<(NaiveDate, &Arc<Snapshot>)> = Vec::new();
        for snap in history {
            let day = day_key(snap.captured_at);
            match daily.last_mut() {
                Some((d, slot)) if *d == day => *slot = snap,
                _ => daily.push((day, snap)),
            }
        }
        daily
    }
}

impl Analyzer for TrendAnalyzer {
    /// Ranks records by one field. Records without a known value always
    /// sort after records with one, whatever the direction; ties break
    /// on the stable code.
    fn top_by_field(
        &self,
        snapshot: &Snapshot,
        field: SortField,
        order: SortOrder,
        k: usize,
    ) -> Vec<FlowRecord> {
        let mut records: Vec<FlowRecord> = snapshot.records.clone();
        records.sort_by(|a, b| {
            let by_value = match (a.field(field).known(), b.field(field).known()) {
                (Some(x), Some(y)) => {
                    let cmp = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                    match order {
                        SortOrder::Descending => cmp.reverse(),
                        SortOrder::Ascending => cmp,
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_value.then_with(|| a.code.cmp(&b.code))
        });
        records.truncate(k);
        records
    }

    /// Finds stocks present on each of the `days` most recent calendar
    /// days in history with a strictly positive known value every day.
    /// Fewer sampled days than requested yields no streaks at all.
    fn continuous_inflow(
        &self,
        history: &[Arc<Snapshot>],
        field: SortField,
        days: usize,
    ) -> Vec<InflowStreak> {
        if days == 0 {
            return Vec::new();
        }

        let daily = Self::last_snapshot_per_day(history);
        if daily.len() < days {
            return Vec::new();
        }
        let window = &daily[daily.len() - days..];

        let day_maps: Vec<HashMap<&str, &FlowRecord>> = window
            .iter()
            .map(|(_, snap)| {
                snap.records
                    .iter()
                    .map(|r| (r.code.as_str(), r))
                    .collect()
            })
            .collect();

        let Some((_, last_snap)) = window.last() else {
            return Vec::new();
        };

        let mut streaks = Vec::new();
        for record in &last_snap.records {
            let mut cumulative = 0.0;
            let mut qualified = true;
            for day_map in &day_maps {
                match day_map.get(record.code.as_str()).map(|r| r.field(field)) {
                    Some(FlowValue::Known(v)) if v > 0.0 => cumulative += v,
                    _ => {
                        qualified = false;
                        break;
                    }
                }
            }
            if qualified {
                streaks.push(InflowStreak {
                    code: record.code.clone(),
                    name: record.name.clone(),
                    price: record.price,
                    pct_change: record.pct_change,
                    days,
                    cumulative: round2(cumulative),
                    daily_average: round2(cumulative / days as f64),
                });
            }
        }

        streaks.sort_by(|a, b| {
            b.cumulative
                .partial_cmp(&a.cumulative)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.code.cmp(&b.code))
        });
        streaks
    }

    fn market_summary(&self, snapshot: &Snapshot) -> MarketSummary {
        let mut rising = 0;
        let mut falling = 0;
        let mut flat = 0;
        let mut unknown_pct = 0;
        let mut inflow_count = 0;
        let mut outflow_count = 0;
        let mut main_sum = 0.0;
        let mut main_known = 0usize;

        for record in &snapshot.records {
            match record.pct_change {
                FlowValue::Known(p) if p > 0.0 => rising += 1,
                FlowValue::Known(p) if p < 0.0 => falling += 1,
                FlowValue::Known(_) => flat += 1,
                FlowValue::Unknown => unknown_pct += 1,
            }

            if record.main_inflow.is_positive() {
                inflow_count += 1;
            } else if record.main_inflow.is_negative() {
                outflow_count += 1;
            }
            if let Some(main) = record.main_inflow.known() {
                main_known += 1;
                main_sum += main;
            }
        }

        let known_pct = rising + falling + flat;
        let sentiment = if known_pct == 0 {
            0.0
        } else {
            round4((rising as f64 - falling as f64) / known_pct as f64)
        };

        let (total_main_inflow, mean_main_inflow) = if main_known == 0 {
            (FlowValue::Unknown, FlowValue::Unknown)
        } else {
            (
                FlowValue::Known(round2(main_sum)),
                FlowValue::Known(round2(main_sum / main_known as f64)),
            )
        };

        MarketSummary {
            total_records: snapshot.records.len(),
            rising,
            falling,
            flat,
            unknown_pct,
            inflow_count,
            outflow_count,
            total_main_inflow,
            mean_main_inflow,
            sentiment,
        }
    }
}
