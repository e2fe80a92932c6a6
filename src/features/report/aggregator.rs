use crate::error::ApiError;
use crate::features::report::request::ReportRequest;
use crate::search_console::SearchAnalyticsApi;
use crate::search_console::models::{SearchAnalyticsQuery, SearchAnalyticsRow};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Export column order. Also the CSV header.
pub const COLUMNS: [&str; 6] = ["site", "query", "clicks", "impressions", "ctr", "position"];

/// The API refuses pages larger than this.
pub const API_MAX_ROWS_PER_REQUEST: u32 = 25_000;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const MAX_CONCURRENCY: usize = 8;

const CANCELLED_REASON: &str = "cancelled before query started";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub site: String,
    pub query: String,
    pub clicks: u64,
    pub impressions: u64,
    pub ctr: f64,
    pub position: f64,
}

impl ReportRow {
    fn from_api(site: &str, row: SearchAnalyticsRow) -> Self {
        Self {
            site: site.to_string(),
            query: row.keys.into_iter().next().unwrap_or_default(),
            clicks: row.clicks,
            impressions: row.impressions,
            ctr: row.ctr,
            position: row.position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedProperty {
    pub site: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub columns: [&'static str; 6],
    pub properties: usize,
    pub rows: Vec<ReportRow>,
    pub skipped: Vec<SkippedProperty>,
}

impl Report {
    pub fn new(properties: usize, mut rows: Vec<ReportRow>, skipped: Vec<SkippedProperty>) -> Self {
        sort_rows(&mut rows);
        Self {
            columns: COLUMNS,
            properties,
            rows,
            skipped,
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub concurrency: usize,
    pub retry_transient: bool,
    pub retry_delay: Duration,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_transient: true,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl AggregateOptions {
    pub fn with_concurrency(mut self, concurrency: Option<usize>) -> Self {
        if let Some(concurrency) = concurrency {
            self.concurrency = concurrency;
        }
        self
    }

    fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

enum PropertyOutcome {
    Fetched(Result<Vec<ReportRow>, ApiError>),
    Cancelled,
}

/// Site URLs accessible to the session, in API order.
pub async fn list_properties<A: SearchAnalyticsApi>(api: &A) -> Result<Vec<String>, ApiError> {
    let sites = api.list_sites().await?;
    Ok(sites.into_iter().map(|site| site.site_url).collect())
}

/// Fetches up to `request.row_limit` query rows for one property, paging with `startRow`.
pub async fn query_property<A: SearchAnalyticsApi>(
    api: &A,
    property: &str,
    request: &ReportRequest,
) -> Result<Vec<ReportRow>, ApiError> {
    let limit = request.row_limit as usize;
    let mut rows = Vec::new();
    let mut start_row = 0u32;

    loop {
        let remaining = request.row_limit.saturating_sub(rows.len() as u32);
        let page_size = remaining.min(API_MAX_ROWS_PER_REQUEST);
        let query = SearchAnalyticsQuery {
            start_date: request.start(),
            end_date: request.end(),
            dimensions: vec!["query".to_string()],
            row_limit: page_size,
            start_row,
        };

        let response = api.query(property, &query).await?;
        let page_len = response.rows.len();
        debug!(site = property, start_row, page_len, "fetched page");
        rows.extend(
            response
                .rows
                .into_iter()
                .map(|row| ReportRow::from_api(property, row)),
        );

        if page_len < page_size as usize || rows.len() >= limit {
            break;
        }
        start_row = start_row.saturating_add(page_len as u32);
    }

    rows.truncate(limit);
    Ok(rows)
}

async fn query_with_retry<A: SearchAnalyticsApi>(
    api: &A,
    property: &str,
    request: &ReportRequest,
    options: &AggregateOptions,
) -> Result<Vec<ReportRow>, ApiError> {
    match query_property(api, property, request).await {
        Err(err) if options.retry_transient && err.is_transient() => {
            debug!(site = property, error = %err, "retrying after transient failure");
            tokio::time::sleep(options.retry_delay).await;
            query_property(api, property, request).await
        }
        outcome => outcome,
    }
}

/// Lists every property and merges their query rows into one report.
///
/// Only a failed property listing fails the whole report. A property that
/// errors is recorded in `skipped` and the rest still contribute rows.
/// Once `cancel` fires, properties whose query has not started are skipped
/// while in-flight queries finish.
pub async fn generate_report<A: SearchAnalyticsApi>(
    api: &A,
    request: &ReportRequest,
    options: &AggregateOptions,
    cancel: &CancellationToken,
) -> Result<Report, ApiError> {
    let properties = list_properties(api).await?;
    info!(
        properties = properties.len(),
        start = %request.start_date,
        end = %request.end_date,
        "generating report"
    );

    let outcomes: Vec<(String, PropertyOutcome)> = stream::iter(properties.iter().cloned())
        .map(move |property| async move {
            if cancel.is_cancelled() {
                return (property, PropertyOutcome::Cancelled);
            }
            let result = query_with_retry(api, &property, request, options)
                .await
                .map_err(|err| ApiError::PropertyFailed {
                    property: property.clone(),
                    reason: err.to_string(),
                });
            (property, PropertyOutcome::Fetched(result))
        })
        .buffered(options.effective_concurrency())
        .collect()
        .await;

    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    for (property, outcome) in outcomes {
        match outcome {
            PropertyOutcome::Fetched(Ok(property_rows)) => {
                debug!(site = %property, rows = property_rows.len(), "property done");
                rows.extend(property_rows);
            }
            PropertyOutcome::Fetched(Err(err)) => {
                warn!(error = %err, "skipping property");
                let reason = match err {
                    ApiError::PropertyFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                skipped.push(SkippedProperty {
                    site: property,
                    reason,
                });
            }
            PropertyOutcome::Cancelled => {
                skipped.push(SkippedProperty {
                    site: property,
                    reason: CANCELLED_REASON.to_string(),
                });
            }
        }
    }

    Ok(Report::new(properties.len(), rows, skipped))
}

/// Site ascending, then clicks descending. Stable, so API order breaks ties.
pub fn sort_rows(rows: &mut [ReportRow]) {
    rows.sort_by(|a, b| a.site.cmp(&b.site).then_with(|| b.clicks.cmp(&a.clicks)));
}
