//! Client side of the recipe store: a count probe plus a scatter-gather
//! fetcher that pulls every page of a remote store concurrently.

use std::time::Duration;

use recipe_store_api::{RecordListResponse, TotalResponse};
use recipe_store_core::SortKey;
use serde::de::DeserializeOwned;
use serde::Deserialize;

mod scatter;

pub use scatter::ScatterGatherFetcher;

const PAGE_TIMEOUT_MS_ENV: &str = "RECIPE_FETCH_PAGE_TIMEOUT_MS";
const DEADLINE_MS_ENV: &str = "RECIPE_FETCH_DEADLINE_MS";
const MAX_IN_FLIGHT_ENV: &str = "RECIPE_FETCH_MAX_IN_FLIGHT";

pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_millis(1_000);
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(10_000);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(2_000);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("count probe failed: {0}")]
    ProbeFailed(String),
    #[error("fetching page {page} failed: {reason}")]
    PageFetchFailed { page: usize, reason: String },
    #[error("deadline exceeded after {received} of {expected} pages")]
    DeadlineExceeded { received: usize, expected: usize },
    #[error("page fetch tasks stopped after {received} of {expected} pages")]
    Incomplete { received: usize, expected: usize },
    #[error("page size must be at least 1")]
    InvalidPageSize,
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Tuning knobs for the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchConfig {
    /// Bound on a single page request, measured from when it starts.
    pub page_timeout: Duration,
    /// Bound on the whole `fetch_all` call.
    pub deadline: Duration,
    pub probe_timeout: Duration,
    pub max_in_flight: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            deadline: DEFAULT_DEADLINE,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl FetchConfig {
    /// Defaults overridden by `RECIPE_FETCH_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            page_timeout: env_millis(PAGE_TIMEOUT_MS_ENV, 50, 30_000)
                .unwrap_or(defaults.page_timeout),
            deadline: env_millis(DEADLINE_MS_ENV, 100, 600_000).unwrap_or(defaults.deadline),
            probe_timeout: defaults.probe_timeout,
            max_in_flight: env_parse::<usize>(MAX_IN_FLIGHT_ENV)
                .map(|value| value.clamp(1, 1_024))
                .unwrap_or(defaults.max_in_flight),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|value| value.trim().parse::<T>().ok())
}

fn env_millis(var: &str, min: u64, max: u64) -> Option<Duration> {
    env_parse::<u64>(var).map(|value| Duration::from_millis(value.clamp(min, max)))
}

#[derive(Debug, Deserialize)]
struct ServiceEnvelope<T> {
    data: T,
}

/// HTTP handle on a remote recipe store.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
}

impl RemoteStore {
    /// # Errors
    /// Returns [`FetchError::Client`] when the HTTP client cannot be built.
    pub fn new(base_url: &str, probe_timeout: Duration) -> Result<Self, FetchError> {
        let client =
            reqwest::Client::builder().build().map_err(|err| FetchError::Client(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            probe_timeout,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the remote store how many records it holds.
    ///
    /// A single attempt: any transport error, non-success status, or
    /// malformed body fails the probe.
    ///
    /// # Errors
    /// Returns [`FetchError::ProbeFailed`] describing the failure.
    pub async fn fetch_total_count(&self) -> Result<usize, FetchError> {
        let url = format!("{}/v1/records/count", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|err| FetchError::ProbeFailed(format!("{url} is unavailable: {err}")))?;
        let total: TotalResponse =
            read_envelope(response).await.map_err(FetchError::ProbeFailed)?;
        Ok(total.total)
    }

    /// Fetch one 1-indexed page sorted by name, along with the total the
    /// remote reported while serving it.
    ///
    /// # Errors
    /// Returns a description of the transport, status, or decoding failure.
    pub async fn fetch_page(
        &self,
        page: usize,
        limit: usize,
    ) -> Result<RecordListResponse, String> {
        let url = format!(
            "{}/v1/records?page={page}&limit={limit}&sort_by={}",
            self.base_url,
            SortKey::Name
        );
        let response = self.client.get(&url).send().await.map_err(|err| err.to_string())?;
        read_envelope(response).await
    }
}

async fn read_envelope<T>(response: reqwest::Response) -> Result<T, String>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {} from {}", status.as_u16(), response.url()));
    }
    let body = response.bytes().await.map_err(|err| err.to_string())?;
    serde_json::from_slice::<ServiceEnvelope<T>>(&body)
        .map(|envelope| envelope.data)
        .map_err(|err| format!("malformed response body: {err}"))
}
