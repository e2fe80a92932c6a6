pub mod aggregator;
pub mod export;
pub mod request;

use crate::cli::ReportArgs;
use crate::error::{ApiError, AppError, AppResult, AuthError};
use crate::features::auth::client_config::ClientConfig;
use crate::features::auth::credentials::{Session, TokenRecord};
use crate::features::auth::{integration, oauth, session};
use crate::search_console::SearchAnalyticsApi;
use crate::search_console::client::SearchConsoleClient;
use aggregator::{AggregateOptions, Report};
use chrono::Local;
use request::{DEFAULT_ROW_LIMIT, ReportRequest};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
pub struct ReportOutput {
    pub ok: bool,
    #[serde(flatten)]
    pub request: ReportRequest,
    #[serde(flatten)]
    pub report: Report,
    pub csv_path: Option<String>,
}

struct ReportSettings {
    request: ReportRequest,
    options: AggregateOptions,
    timeout: Duration,
}

pub async fn run(args: ReportArgs, cancel: CancellationToken) -> AppResult<ReportOutput> {
    let settings = resolve_settings(&args)?;
    let client_config = integration::resolve_client_config(args.client_secrets.clone())?;
    let record = integration::load_token_record()?
        .ok_or_else(|| AppError::auth("Not signed in. Run `gsc-report login` first."))?;

    let http = oauth::token_http_client(settings.timeout)
        .map_err(|err| AppError::generic(format!("Failed to build HTTP client: {err}")))?;

    let report = generate_for_record(
        record,
        &client_config,
        &http,
        &LocalSessionStore,
        |session| SearchConsoleClient::new(session, settings.timeout),
        &settings,
        &cancel,
    )
    .await?;

    let csv_path = match args.csv.as_deref() {
        Some(path) => {
            export::write_csv_file(&report, path)?;
            Some(path.display().to_string())
        }
        None => None,
    };

    Ok(ReportOutput {
        ok: true,
        request: settings.request,
        report,
        csv_path,
    })
}

/// Persistence for the signed-in session.
trait SessionStore {
    fn save(&self, record: &TokenRecord) -> AppResult<()>;
    fn discard(&self) -> AppResult<()>;
}

/// The encrypted local config store.
struct LocalSessionStore;

impl SessionStore for LocalSessionStore {
    fn save(&self, record: &TokenRecord) -> AppResult<()> {
        integration::save_token_record(record)
    }

    fn discard(&self) -> AppResult<()> {
        integration::clear_session()
    }
}

/// Activates `record` and runs the aggregator against the API built by
/// `make_api`. A 401 on the listing call refreshes the session once and
/// retries once; a second 401 is returned as an auth error.
async fn generate_for_record<A, F, S>(
    record: TokenRecord,
    client_config: &ClientConfig,
    http: &reqwest::Client,
    store: &S,
    make_api: F,
    settings: &ReportSettings,
    cancel: &CancellationToken,
) -> AppResult<Report>
where
    A: SearchAnalyticsApi,
    F: Fn(&Session) -> AppResult<A>,
    S: SessionStore,
{
    let active = session::activate(record, client_config, http)
        .await
        .map_err(|err| discard_session(store, err))?;
    if active.refreshed {
        store.save(active.session.record())?;
    }

    let api = make_api(&active.session)?;
    match aggregator::generate_report(&api, &settings.request, &settings.options, cancel).await {
        Ok(report) => Ok(report),
        Err(ApiError::Unauthorized(reason)) => {
            warn!(%reason, "reporting API rejected the session; refreshing once");
            let renewed = session::renew(&active.session, client_config, http)
                .await
                .map_err(|err| discard_session(store, err))?;
            store.save(renewed.record())?;

            let api = make_api(&renewed)?;
            Ok(aggregator::generate_report(&api, &settings.request, &settings.options, cancel).await?)
        }
        Err(err) => Err(err.into()),
    }
}

fn resolve_settings(args: &ReportArgs) -> AppResult<ReportSettings> {
    let stored = integration::report_config()?;
    let row_limit = args
        .row_limit
        .or(stored.row_limit)
        .unwrap_or(DEFAULT_ROW_LIMIT);
    let timeout_secs = args
        .timeout_secs
        .or(stored.timeout_secs)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(AppError::invalid_input("Timeout must be at least one second."));
    }

    let today = Local::now().date_naive();
    let request = ReportRequest::from_args(args.start, args.end, args.last, row_limit, today)?;

    Ok(ReportSettings {
        request,
        options: AggregateOptions::default()
            .with_concurrency(args.concurrency.or(stored.concurrency)),
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn discard_session<S: SessionStore>(store: &S, err: AuthError) -> AppError {
    warn!(error = %err, "discarding stored session");
    if let Err(clear_err) = store.discard() {
        warn!(error = %clear_err, "failed to clear stored session");
    }
    err.into()
}
