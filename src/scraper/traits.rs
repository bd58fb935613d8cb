use crate::model::{FlowQuery, RawPage, TransportError};

/// One HTTP GET per page, no business logic. The seam tests script
/// against.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn get_page(&self, query: &FlowQuery, page: u32) -> Result<RawPage, TransportError>;
}
