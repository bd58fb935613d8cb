use crate::model::{FlowRecord, Snapshot, SortField};
use chrono::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Result of offering a snapshot to the store.
#[derive(Debug)]
pub enum PublishOutcome {
    /// Snapshot accepted. `changed` is true when it differs from the
    /// previous latest in code set or in any tracked field.
    Stored {
        snapshot: Arc<Snapshot>,
        changed: bool,
    },
    /// Snapshot was captured before the current latest and was dropped.
    RejectedStale,
}

/// Bounded FIFO history of accepted snapshots, newest at the back.
/// Change detection happens here so every consumer sees the same
/// verdict for a given publish.
pub struct SnapshotStore {
    history: VecDeque<Arc<Snapshot>>,
    max_len: usize,
    max_age: Option<Duration>,
    tracked_fields: Vec<SortField>,
}

impl SnapshotStore {
    pub fn new(max_len: usize, max_age: Option<Duration>, tracked_fields: Vec<SortField>) -> Self {
        Self {
            history: VecDeque::new(),
            max_len: max_len.max(1),
            max_age,
            tracked_fields,
        }
    }

    pub fn publish(&mut self, snapshot: Snapshot) -> PublishOutcome {
        if let Some(latest) = self.history.back() {
            if snapshot.captured_at < latest.captured_at {
                return PublishOutcome::RejectedStale;
            }
        }

        let changed = self.differs_from_latest(&snapshot);
        let snapshot = Arc::new(snapshot);
        self.history.push_back(Arc::clone(&snapshot));
        self.evict();

        PublishOutcome::Stored { snapshot, changed }
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.history.back().cloned()
    }

    /// Up to the `n` most recent snapshots, oldest first.
    pub fn history(&self, n: usize) -> Vec<Arc<Snapshot>> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    fn differs_from_latest(&self, candidate: &Snapshot) -> bool {
        let Some(latest) = self.history.back() else {
            return true;
        };

        let prior: HashMap<&str, &FlowRecord> = latest
            .records
            .iter()
            .map(|r| (r.code.as_str(), r))
            .collect();

        if candidate.records.len() != prior.len() {
            return true;
        }

        for record in &candidate.records {
            let Some(old) = prior.get(record.code.as_str()) else {
                return true;
            };
            for field in &self.tracked_fields {
                if record.field(*field) != old.field(*field) {
                    return true;
                }
            }
        }

        false
    }

    fn evict(&mut self) {
        while self.history.len() > self.max_len {
            self.history.pop_front();
        }

        // Age eviction never drops the latest snapshot.
        if let Some(max_age) = self.max_age {
            if let Some(newest) = self.history.back().map(|s| s.captured_at) {
                let cutoff = newest - max_age;
                while self.history.len() > 1
                    && self
                        .history
                        .front()
                        .is_some_and(|s| s.captured_at < cutoff)
                {
                    self.history.pop_front();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlowQuery, FlowValue};
    use chrono::{DateTime, Utc};

    fn at(minute: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_721_610_000 + minute * 60, 0).unwrap()
    }

    fn record(code: &str, main: f64, price: f64) -> FlowRecord {
        FlowRecord {
            code: code.to_string(),
            name: format!("股票{code}"),
            price: FlowValue::Known(price),
            pct_change: FlowValue::Unknown,
            volume: FlowValue::Unknown,
            turnover: FlowValue::Unknown,
            main_inflow: FlowValue::Known(main),
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
            captured_at: at(0),
        }
    }

    fn snapshot(minute: i64, records: Vec<FlowRecord>) -> Snapshot {
        Snapshot {
            captured_at: at(minute),
            query: FlowQuery::default(),
            records,
        }
    }

    fn store() -> SnapshotStore {
        SnapshotStore::new(8, None, vec![SortField::MainInflow])
    }

    fn assert_changed(outcome: PublishOutcome, want: bool) {
        match outcome {
            PublishOutcome::Stored { changed, .. } => assert_eq!(changed, want),
            PublishOutcome::RejectedStale => panic!("expected Stored"),
        }
    }

    #[test]
    fn first_snapshot_counts_as_change() {
        let mut store = store();
        let outcome = store.publish(snapshot(0, vec![record("600519", 100.0, 10.0)]));
        assert_changed(outcome, true);
    }

    #[test]
    fn identical_tracked_values_are_quiet() {
        let mut store = store();
        store.publish(snapshot(0, vec![record("600519", 100.0, 10.0)]));
        let outcome = store.publish(snapshot(1, vec![record("600519", 100.0, 10.0)]));
        assert_changed(outcome, false);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn tracked_field_move_is_a_change() {
        let mut store = store();
        store.publish(snapshot(0, vec![record("600519", 100.0, 10.0)]));
        let outcome = store.publish(snapshot(1, vec![record("600519", 250.0, 10.0)]));
        assert_changed(outcome, true);
    }

    #[test]
    fn untracked_field_move_is_quiet() {
        let mut store = store();
        store.publish(snapshot(0, vec![record("600519", 100.0, 10.0)]));
        let outcome = store.publish(snapshot(1, vec![record("600519", 100.0, 99.0)]));
        assert_changed(outcome, false);
    }

    #[test]
    fn code_set_change_is_a_change() {
        let mut store = store();
        store.publish(snapshot(0, vec![record("600519", 100.0, 10.0)]));
        let outcome = store.publish(
            snapshot(
                1,
                vec![record("600519", 100.0, 10.0), record("000001", 5.0, 1.0)],
            ),
        );
        assert_changed(outcome, true);
    }

    #[test]
    fn unknown_to_known_transition_is_a_change() {
        let mut store = store();
        let mut first = record("600519", 0.0, 10.0);
        first.main_inflow = FlowValue::Unknown;
        store.publish(snapshot(0, vec![first]));
        let outcome = store.publish(snapshot(1, vec![record("600519", 0.0, 10.0)]));
        assert_changed(outcome, true);
    }

    #[test]
    fn older_snapshot_is_rejected() {
        let mut store = store();
        store.publish(snapshot(5, vec![record("600519", 100.0, 10.0)]));
        let outcome = store.publish(snapshot(2, vec![record("600519", 999.0, 10.0)]));
        assert!(matches!(outcome, PublishOutcome::RejectedStale));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn history_is_capped_fifo() {
        let mut store = SnapshotStore::new(3, None, vec![SortField::MainInflow]);
        for minute in 0..5 {
            store.publish(snapshot(minute, vec![record("600519", minute as f64, 1.0)]));
        }
        assert_eq!(store.len(), 3);
        let kept = store.history(10);
        let minutes: Vec<_> = kept.iter().map(|s| s.captured_at).collect();
        assert_eq!(minutes, vec![at(2), at(3), at(4)]);
    }

    #[test]
    fn history_window_is_last_n_oldest_first() {
        let mut store = store();
        for minute in 0..5 {
            store.publish(snapshot(minute, vec![record("600519", minute as f64, 1.0)]));
        }
        let window = store.history(2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].captured_at, at(3));
        assert_eq!(window[1].captured_at, at(4));
    }

    #[test]
    fn age_eviction_keeps_the_latest() {
        let mut store = SnapshotStore::new(
            8,
            Some(Duration::minutes(30)),
            vec![SortField::MainInflow],
        );
        store.publish(snapshot(0, vec![record("600519", 1.0, 1.0)]));
        store.publish(snapshot(60, vec![record("600519", 2.0, 1.0)]));
        assert_eq!(store.len(), 1);
        assert_eq!(store.latest().unwrap().captured_at, at(60));
    }
}
