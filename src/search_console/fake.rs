//! In-memory `SearchAnalyticsApi` for tests.

use crate::error::ApiError;
use crate::search_console::SearchAnalyticsApi;
use crate::search_console::models::{
    SearchAnalyticsQuery, SearchAnalyticsResponse, SearchAnalyticsRow, SiteEntry,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub type Page = Result<Vec<SearchAnalyticsRow>, ApiError>;

/// Serves queued pages per site; an exhausted queue answers with no rows.
#[derive(Default)]
pub struct FakeApi {
    pub sites: Vec<String>,
    pub listing_error: Option<ApiError>,
    pub pages: Mutex<HashMap<String, VecDeque<Page>>>,
    pub calls: Mutex<Vec<(String, SearchAnalyticsQuery)>>,
    pub cancel_on: Option<(String, CancellationToken)>,
}

impl FakeApi {
    pub fn with_sites(sites: &[&str]) -> Self {
        Self {
            sites: sites.iter().map(|site| site.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn rejecting_session() -> Self {
        Self {
            listing_error: Some(ApiError::Unauthorized("site listing".to_string())),
            ..Self::default()
        }
    }

    pub fn page(self, site: &str, page: Page) -> Self {
        self.pages
            .lock()
            .unwrap()
            .entry(site.to_string())
            .or_default()
            .push_back(page);
        self
    }

    pub fn calls_for(&self, site: &str) -> Vec<SearchAnalyticsQuery> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == site)
            .map(|(_, query)| query.clone())
            .collect()
    }
}

impl SearchAnalyticsApi for FakeApi {
    async fn list_sites(&self) -> Result<Vec<SiteEntry>, ApiError> {
        if let Some(err) = &self.listing_error {
            return Err(err.clone());
        }
        Ok(self
            .sites
            .iter()
            .map(|site| SiteEntry {
                site_url: site.clone(),
            })
            .collect())
    }

    async fn query(
        &self,
        site_url: &str,
        query: &SearchAnalyticsQuery,
    ) -> Result<SearchAnalyticsResponse, ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push((site_url.to_string(), query.clone()));
        if let Some((site, token)) = &self.cancel_on {
            if site == site_url {
                token.cancel();
            }
        }
        let page = self
            .pages
            .lock()
            .unwrap()
            .get_mut(site_url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(Vec::new()));
        page.map(|rows| SearchAnalyticsResponse { rows })
    }
}
