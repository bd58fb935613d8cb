// Storage module: in-memory snapshot history plus the SQLite sink.

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteSink;
pub use store::{PublishOutcome, SnapshotStore};
