use crate::model::{FetchError, ObserverError, Snapshot};
use tracing::{info, warn};

/// Callback surface for snapshot consumers. The monitor fans a stored
/// snapshot out to every registered observer when its content changed,
/// and reports cycle failures. One failing observer never blocks the
/// others.
#[async_trait::async_trait]
pub trait SnapshotObserver: Send + Sync {
    fn name(&self) -> &str {
        "observer"
    }

    async fn on_snapshot(&self, snapshot: &Snapshot) -> Result<(), ObserverError>;

    async fn on_cycle_error(&self, _error: &FetchError) {}
}

/// Minimal observer that writes a one line digest per snapshot.
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl SnapshotObserver for LogObserver {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_snapshot(&self, snapshot: &Snapshot) -> Result<(), ObserverError> {
        info!(
            "📊 {}: {} records captured at {}",
            snapshot.query.describe(),
            snapshot.len(),
            snapshot.captured_at.format("%Y-%m-%d %H:%M:%S")
        );
        Ok(())
    }

    async fn on_cycle_error(&self, error: &FetchError) {
        warn!("cycle produced no snapshot: {error}");
    }
}
