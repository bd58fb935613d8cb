use crate::model::{ObserverError, Snapshot};
use crate::observer::SnapshotObserver;
use rusqlite::{params, Connection};
use std::sync::Mutex;
use tracing::debug;

impl From<rusqlite::Error> for ObserverError {
    fn from(e: rusqlite::Error) -> Self {
        ObserverError::Database(e.to_string())
    }
}

/// Observer that appends every changed snapshot to a SQLite file, one
/// row per snapshot plus one row per record.
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    pub fn new(db_path: &str) -> Result<Self, ObserverError> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                captured_at TEXT NOT NULL,
                segment TEXT NOT NULL,
                record_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS flow_records (
                snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
                code TEXT NOT NULL,
                name TEXT NOT NULL,
                price REAL,
                pct_change REAL,
                volume REAL,
                turnover REAL,
                main_inflow REAL,
                main_ratio REAL,
                huge_inflow REAL,
                huge_ratio REAL,
                large_inflow REAL,
                large_ratio REAL,
                medium_inflow REAL,
                medium_ratio REAL,
                small_inflow REAL,
                small_ratio REAL,
                updated_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_flow_records_snapshot
                ON flow_records (snapshot_id, code);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn store_snapshot(&self, snapshot: &Snapshot) -> Result<(), ObserverError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| ObserverError::Database("connection mutex poisoned".to_string()))?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO snapshots (captured_at, segment, record_count) VALUES (?1, ?2, ?3)",
            params![
                snapshot.captured_at.to_rfc3339(),
                snapshot.query.segment.label(),
                snapshot.records.len() as i64,
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO flow_records (
                    snapshot_id, code, name, price, pct_change, volume, turnover,
                    main_inflow, main_ratio, huge_inflow, huge_ratio,
                    large_inflow, large_ratio, medium_inflow, medium_ratio,
                    small_inflow, small_ratio, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            )?;

            for record in &snapshot.records {
                stmt.execute(params![
                    snapshot_id,
                    &record.code,
                    &record.name,
                    record.price.known(),
                    record.pct_change.known(),
                    record.volume.known(),
                    record.turnover.known(),
                    record.main_inflow.known(),
                    record.main_ratio.known(),
                    record.huge_inflow.known(),
                    record.huge_ratio.known(),
                    record.large_inflow.known(),
                    record.large_ratio.known(),
                    record.medium_inflow.known(),
                    record.medium_ratio.known(),
                    record.small_inflow.known(),
                    record.small_ratio.known(),
                    record.updated_at.map(|t| t.to_rfc3339()),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Total snapshots persisted so far. Used for the shutdown digest.
    pub fn stored_snapshots(&self) -> Result<i64, ObserverError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ObserverError::Database("connection mutex poisoned".to_string()))?;
        let count = conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait::async_trait]
impl SnapshotObserver for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn on_snapshot(&self, snapshot: &Snapshot) -> Result<(), ObserverError> {
        self.store_snapshot(snapshot)?;
        debug!("persisted snapshot with {} records", snapshot.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlowQuery, FlowRecord, FlowValue};
    use chrono::{DateTime, Utc};

    fn record(code: &str, main: Option<f64>) -> FlowRecord {
        FlowRecord {
            code: code.to_string(),
            name: format!("股票{code}"),
            price: FlowValue::Known(12.5),
            pct_change: FlowValue::Known(1.2),
            volume: FlowValue::Unknown,
            turnover: FlowValue::Unknown,
            main_inflow: main.map_or(FlowValue::Unknown, FlowValue::Known),
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
            captured_at: captured(),
        }
    }

    fn captured() -> DateTime<Utc> {
        DateTime::from_timestamp(1_721_613_600, 0).unwrap()
    }

    fn snapshot(records: Vec<FlowRecord>) -> Snapshot {
        Snapshot {
            captured_at: captured(),
            query: FlowQuery::default(),
            records,
        }
    }

    #[test]
    fn snapshot_rows_and_record_rows_are_written() {
        let sink = SqliteSink::new(":memory:").unwrap();
        let snap = snapshot(vec![record("600519", Some(1234.56)), record("000001", None)]);

        sink.store_snapshot(&snap).unwrap();

        assert_eq!(sink.stored_snapshots().unwrap(), 1);
        let conn = sink.conn.lock().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM flow_records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[test]
    fn unknown_values_persist_as_null() {
        let sink = SqliteSink::new(":memory:").unwrap();
        sink.store_snapshot(&snapshot(vec![record("000001", None)]))
            .unwrap();

        let conn = sink.conn.lock().unwrap();
        let main: Option<f64> = conn
            .query_row(
                "SELECT main_inflow FROM flow_records WHERE code = '000001'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(main, None);

        let price: Option<f64> = conn
            .query_row(
                "SELECT price FROM flow_records WHERE code = '000001'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(price, Some(12.5));
    }

    #[test]
    fn each_snapshot_appends() {
        let sink = SqliteSink::new(":memory:").unwrap();
        sink.store_snapshot(&snapshot(vec![record("600519", Some(1.0))]))
            .unwrap();
        sink.store_snapshot(&snapshot(vec![record("600519", Some(2.0))]))
            .unwrap();
        assert_eq!(sink.stored_snapshots().unwrap(), 2);
    }
}
