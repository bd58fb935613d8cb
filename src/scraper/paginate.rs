use crate::model::{FailedPage, FetchError, FetchOutcome, FlowQuery, RawPage, TransportError};
use crate::scraper::Transport;
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fans a query out over the provider's pages: page 1 first to learn
/// the total, then the rest with bounded concurrency and per-page
/// retries. Losing a sibling page degrades the snapshot, losing page 1
/// fails the whole fetch.
pub struct PageFetcher {
    transport: Arc<dyn Transport>,
    concurrency: usize,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl PageFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        concurrency: usize,
        retry_attempts: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            transport,
            concurrency,
            retry_attempts,
            retry_backoff,
        }
    }

    pub async fn fetch_all(
        &self,
        query: &FlowQuery,
    ) -> Result<(Vec<RawPage>, FetchOutcome), FetchError> {
        let first = match self.fetch_page_with_retry(query, 1).await {
            Ok(page) => page,
            Err(cause) => {
                return Err(FetchError::NoPages {
                    attempts: self.retry_attempts.max(1),
                    cause,
                });
            }
        };

        let reported_total = first.total;
        let planned = self.plan_pages(query, reported_total);
        debug!(
            "{}: provider reports {} records across {} page(s)",
            query.describe(),
            reported_total,
            planned
        );

        let mut pages = vec![first];
        let mut failed_pages: Vec<FailedPage> = Vec::new();

        if planned > 1 {
            let results: Vec<(u32, Result<RawPage, TransportError>)> = stream::iter(2..=planned)
                .map(|page| async move { (page, self.fetch_page_with_retry(query, page).await) })
                .buffer_unordered(self.concurrency.max(1))
                .collect()
                .await;

            for (page, result) in results {
                match result {
                    Ok(raw) => pages.push(raw),
                    Err(e) => {
                        warn!("page {page} dropped after retries: {e}");
                        failed_pages.push(FailedPage {
                            index: page,
                            cause: e.to_string(),
                        });
                    }
                }
            }
        }

        pages.sort_by_key(|p| p.index);
        failed_pages.sort_by_key(|f| f.index);

        let outcome = FetchOutcome {
            reported_total,
            pages_planned: planned,
            pages_fetched: pages.len(),
            failed_pages,
            parsed_records: 0,
            parse_failures: 0,
            duplicates: 0,
        };

        Ok((pages, outcome))
    }

    fn plan_pages(&self, query: &FlowQuery, total: u64) -> u32 {
        let page_size = query.page_size.max(1) as u64;
        let by_total = total.div_ceil(page_size).max(1);
        let mut planned = u32::try_from(by_total).unwrap_or(u32::MAX);
        if let Some(cap) = query.max_pages {
            planned = planned.min(cap.max(1));
        }
        planned
    }

    async fn fetch_page_with_retry(
        &self,
        query: &FlowQuery,
        page: u32,
    ) -> Result<RawPage, TransportError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.get_page(query, page).await {
                Ok(raw) => return Ok(raw),
                Err(e) => {
                    if attempt >= self.retry_attempts {
                        return Err(e);
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!("page {page} attempt {attempt} failed ({e}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = (attempt - 1).min(6);
        let base = self.retry_backoff.saturating_mul(1 << shift);
        let jitter_cap = (base.as_millis() as u64 / 2).max(1);
        let jitter = rand::rng().random_range(0..jitter_cap);
        base + Duration::from_millis(jitter)
    }
}
