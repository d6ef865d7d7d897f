use std::sync::Arc;
use std::time::Duration;

use recipe_store_api::RecordListResponse;
use recipe_store_core::Record;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{timeout_at, Instant};

use crate::{FetchConfig, FetchError, RemoteStore};

/// Result of one page task, tagged with its 1-indexed page number.
#[derive(Debug)]
struct PageOutcome {
    page: usize,
    result: Result<Vec<Record>, String>,
}

/// Fans out one request per page against a [`RemoteStore`] and merges the
/// pages in the order they arrive.
#[derive(Debug, Clone)]
pub struct ScatterGatherFetcher {
    remote: RemoteStore,
    config: FetchConfig,
}

impl ScatterGatherFetcher {
    #[must_use]
    pub fn new(remote: RemoteStore, config: FetchConfig) -> Self {
        Self { remote, config }
    }

    /// Fetch all `total` records in pages of `page_size`.
    ///
    /// Pages run concurrently, at most `max_in_flight` at a time. The merged
    /// result is in arrival order, not page order. The first failed page fails
    /// the whole call; pages still running are left to finish on their own and
    /// their results are dropped. The whole call is bounded by the configured
    /// deadline.
    ///
    /// Every page must hold exactly the records its position implies and
    /// report the same `total`; anything else means the remote clamped the
    /// page size or changed underneath the fetch, and fails the page.
    ///
    /// # Errors
    /// - [`FetchError::InvalidPageSize`] when `page_size` is zero.
    /// - [`FetchError::PageFetchFailed`] when any page fails, times out, or
    ///   comes back with the wrong number of records.
    /// - [`FetchError::DeadlineExceeded`] when the deadline passes first.
    /// - [`FetchError::Incomplete`] when page tasks stop without reporting.
    pub async fn fetch_all(
        &self,
        total: usize,
        page_size: usize,
    ) -> Result<Vec<Record>, FetchError> {
        if page_size == 0 {
            return Err(FetchError::InvalidPageSize);
        }
        let page_count = total.div_ceil(page_size);
        if page_count == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + self.config.deadline;
        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let (sender, mut receiver) = mpsc::channel::<PageOutcome>(page_count);
        tracing::info!(
            "fetching {total} records in {page_count} pages of {page_size} from {}",
            self.remote.base_url()
        );

        for page in 1..=page_count {
            let remote = self.remote.clone();
            let permits = Arc::clone(&permits);
            let sender = sender.clone();
            let page_timeout = self.config.page_timeout;
            tokio::spawn(async move {
                let plan = PagePlan { page, page_size, total };
                let result = fetch_one(&remote, &permits, plan, page_timeout, deadline).await;
                // Capacity covers every page; this only fails once the batch is abandoned.
                let _ = sender.send(PageOutcome { page, result }).await;
            });
        }
        drop(sender);

        let mut merged = Vec::new();
        for received in 0..page_count {
            let outcome = match timeout_at(deadline, receiver.recv()).await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => {
                    return Err(FetchError::Incomplete { received, expected: page_count });
                }
                Err(_) => {
                    tracing::warn!(
                        "fetch deadline of {:?} passed with {received}/{page_count} pages",
                        self.config.deadline
                    );
                    return Err(FetchError::DeadlineExceeded { received, expected: page_count });
                }
            };
            match outcome.result {
                Ok(records) => {
                    tracing::debug!("page {} delivered {} records", outcome.page, records.len());
                    merged.extend(records);
                }
                Err(reason) => {
                    tracing::warn!("page {} failed: {reason}", outcome.page);
                    return Err(FetchError::PageFetchFailed { page: outcome.page, reason });
                }
            }
        }
        Ok(merged)
    }
}

/// Where one page sits in a fetch of `total` records.
#[derive(Debug, Clone, Copy)]
struct PagePlan {
    page: usize,
    page_size: usize,
    total: usize,
}

impl PagePlan {
    /// Records this page must hold: `page_size` for every page but the last.
    fn expected_len(self) -> usize {
        let start = (self.page - 1).saturating_mul(self.page_size);
        self.total.saturating_sub(start).min(self.page_size)
    }

    fn check(self, listing: RecordListResponse) -> Result<Vec<Record>, String> {
        if listing.total != self.total {
            return Err(format!(
                "remote reported {} records while {} were planned",
                listing.total, self.total
            ));
        }
        let expected = self.expected_len();
        if listing.recipes.len() != expected {
            return Err(format!(
                "expected {expected} records but received {} (page size {})",
                listing.recipes.len(),
                self.page_size
            ));
        }
        Ok(listing.recipes)
    }
}

async fn fetch_one(
    remote: &RemoteStore,
    permits: &Semaphore,
    plan: PagePlan,
    page_timeout: Duration,
    deadline: Instant,
) -> Result<Vec<Record>, String> {
    let request = async {
        let _permit = permits.acquire().await.map_err(|err| err.to_string())?;
        let page_deadline = (Instant::now() + page_timeout).min(deadline);
        match timeout_at(page_deadline, remote.fetch_page(plan.page, plan.page_size)).await {
            Ok(result) => plan.check(result?),
            Err(_) => Err(format!("timed out after {page_timeout:?}")),
        }
    };
    match timeout_at(deadline, request).await {
        Ok(result) => result,
        Err(_) => Err("deadline passed before the request started".to_string()),
    }
}
