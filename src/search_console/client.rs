use crate::error::{ApiError, AppError, AppResult};
use crate::features::auth::credentials::Session;
use crate::search_console::SearchAnalyticsApi;
use crate::search_console::models::{
    SearchAnalyticsQuery, SearchAnalyticsResponse, SiteEntry, SiteList,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

const SEARCH_CONSOLE_API_BASE: &str = "https://www.googleapis.com";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Typed reqwest wrapper for the Search Console (webmasters v3) API.
pub struct SearchConsoleClient {
    http: Client,
    base_url: Url,
    access_token: String,
}

impl SearchConsoleClient {
    pub fn new(session: &Session, timeout: Duration) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::generic(format!("Failed to build HTTP client: {err}")))?;
        let base_url = Url::parse(SEARCH_CONSOLE_API_BASE)
            .map_err(|err| AppError::generic(format!("Invalid API base URL: {err}")))?;

        Ok(Self {
            http,
            base_url,
            access_token: session.access_token().to_string(),
        })
    }

    /// Points the client at another host, e.g. a mock server.
    pub fn with_base_url(mut self, url: &str) -> AppResult<Self> {
        self.base_url = Url::parse(url)
            .map_err(|err| AppError::invalid_input(format!("Invalid API base URL: {err}")))?;
        Ok(self)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Decode(format!("API base URL {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<Response, ApiError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ApiError::Transient(format!("{context} timed out"))
                } else {
                    ApiError::Transient(format!("{context} request failed: {err}"))
                }
            })?;

        let status = response.status();
        debug!(%status, context, "reporting API responded");
        match status {
            StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized(context.to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(ApiError::Transient(format!(
                "{context} was rate limited ({status})"
            ))),
            status if status.is_server_error() => Err(ApiError::Transient(format!(
                "{context} failed with status {status}"
            ))),
            status if !status.is_success() => Err(ApiError::Status {
                status: status.as_u16(),
                context: context.to_string(),
            }),
            _ => Ok(response),
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response, context: &str) -> Result<T, ApiError> {
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::Decode(format!("{context} response: {err}")))
    }
}

impl SearchAnalyticsApi for SearchConsoleClient {
    async fn list_sites(&self) -> Result<Vec<SiteEntry>, ApiError> {
        let url = self.endpoint(&["webmasters", "v3", "sites"])?;
        let response = self.send(self.http.get(url), "site listing").await?;
        let list: SiteList = Self::decode(response, "site listing").await?;
        Ok(list.site_entry)
    }

    async fn query(
        &self,
        site_url: &str,
        query: &SearchAnalyticsQuery,
    ) -> Result<SearchAnalyticsResponse, ApiError> {
        let url = self.endpoint(&[
            "webmasters",
            "v3",
            "sites",
            site_url,
            "searchAnalytics",
            "query",
        ])?;
        let response = self
            .send(self.http.post(url).json(query), "search analytics query")
            .await?;
        Self::decode(response, "search analytics query").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::auth::credentials::{TokenRecord, required_scopes};
    use wiremock::matchers::{bearer_token, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session() -> Session {
        Session::new(TokenRecord {
            access_token: "test-token".to_string(),
            refresh_token: None,
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            scopes: required_scopes(),
            expiry: None,
        })
    }

    async fn setup() -> (MockServer, SearchConsoleClient) {
        let server = MockServer::start().await;
        let client = SearchConsoleClient::new(&session(), Duration::from_secs(5))
            .unwrap()
            .with_base_url(&server.uri())
            .unwrap();
        (server, client)
    }

    fn query_body() -> SearchAnalyticsQuery {
        SearchAnalyticsQuery {
            start_date: "2024-01-01".to_string(),
            end_date: "2024-01-07".to_string(),
            dimensions: vec!["query".to_string()],
            row_limit: 1000,
            start_row: 0,
        }
    }

    #[tokio::test]
    async fn list_sites_sends_bearer_token() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/webmasters/v3/sites"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "siteEntry": [
                    {"siteUrl": "https://example.com/", "permissionLevel": "siteOwner"},
                    {"siteUrl": "sc-domain:example.org", "permissionLevel": "siteFullUser"}
                ]
            })))
            .mount(&server)
            .await;

        let sites = client.list_sites().await.unwrap();
        let urls: Vec<_> = sites.iter().map(|site| site.site_url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/", "sc-domain:example.org"]);
    }

    #[tokio::test]
    async fn list_sites_maps_401_to_unauthorized() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/webmasters/v3/sites"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(matches!(
            client.list_sites().await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn query_percent_encodes_site_url() {
        let (server, client) = setup().await;
        Mock::given(method("POST"))
            .and(path(
                "/webmasters/v3/sites/https:%2F%2Fexample.com%2F/searchAnalytics/query",
            ))
            .and(body_json(serde_json::json!({
                "startDate": "2024-01-01",
                "endDate": "2024-01-07",
                "dimensions": ["query"],
                "rowLimit": 1000,
                "startRow": 0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "rows": [{"keys": ["rust"], "clicks": 3, "impressions": 10, "ctr": 0.3, "position": 1.5}]
            })))
            .mount(&server)
            .await;

        let response = client
            .query("https://example.com/", &query_body())
            .await
            .unwrap();
        assert_eq!(response.rows.len(), 1);
        assert_eq!(response.rows[0].clicks, 3);
    }

    #[tokio::test]
    async fn query_classifies_failures() {
        let (server, client) = setup().await;
        Mock::given(method("POST"))
            .and(path("/webmasters/v3/sites/forbidden/searchAnalytics/query"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webmasters/v3/sites/busy/searchAnalytics/query"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webmasters/v3/sites/garbled/searchAnalytics/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        assert!(matches!(
            client.query("forbidden", &query_body()).await,
            Err(ApiError::Status { status: 403, .. })
        ));
        assert!(matches!(
            client.query("busy", &query_body()).await,
            Err(ApiError::Transient(_))
        ));
        assert!(matches!(
            client.query("garbled", &query_body()).await,
            Err(ApiError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn slow_responses_time_out_as_transient() {
        let server = MockServer::start().await;
        let client = SearchConsoleClient::new(&session(), Duration::from_millis(100))
            .unwrap()
            .with_base_url(&server.uri())
            .unwrap();
        Mock::given(method("GET"))
            .and(path("/webmasters/v3/sites"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        assert!(matches!(
            client.list_sites().await,
            Err(ApiError::Transient(_))
        ));
    }
}
