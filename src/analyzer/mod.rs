// Analyzer module: trend extraction over snapshots and history.

pub mod trend;

// Re-export the main analyzer implementation for ease of use.
pub use trend::{Analyzer, TrendAnalyzer};
