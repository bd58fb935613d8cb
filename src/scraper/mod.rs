// Scraper module: transport seam plus the paginated fan-out built on it.

pub mod http;
pub mod paginate;
pub mod traits;

// Re-export the pieces callers wire together.
pub use http::HttpTransport;
pub use paginate::PageFetcher;
pub use traits::Transport;
