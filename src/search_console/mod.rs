pub mod client;
#[cfg(test)]
pub mod fake;
pub mod models;

use crate::error::ApiError;
use models::{SearchAnalyticsQuery, SearchAnalyticsResponse, SiteEntry};

/// The two reporting API calls the aggregator depends on.
// Single-threaded callers only; the futures never need to be `Send`.
#[allow(async_fn_in_trait)]
pub trait SearchAnalyticsApi {
    async fn list_sites(&self) -> Result<Vec<SiteEntry>, ApiError>;

    async fn query(
        &self,
        site_url: &str,
        query: &SearchAnalyticsQuery,
    ) -> Result<SearchAnalyticsResponse, ApiError>;
}
