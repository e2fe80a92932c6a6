use crate::error::AuthError;
use crate::features::auth::client_config::ClientConfig;
use crate::features::auth::oauth::{self, describe_token_error};
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicTokenResponse;
use oauth2::{RefreshToken, TokenResponse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Read-only Search Console access; every usable record must carry it.
pub const REQUIRED_SCOPE: &str = "https://www.googleapis.com/auth/webmasters.readonly";

/// Access tokens this close to expiry are treated as already expired.
const EXPIRY_SKEW_SECS: i64 = 30;

pub type ScopeSet = BTreeSet<String>;

pub fn required_scopes() -> ScopeSet {
    ScopeSet::from([REQUIRED_SCOPE.to_string()])
}

/// Delegated-authorization state for one user session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: ScopeSet,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    Valid,
    Expired,
    Invalid,
}

impl TokenRecord {
    pub fn has_required_scope(&self) -> bool {
        self.scopes.contains(REQUIRED_SCOPE)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    pub fn serialize(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn deserialize(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Explicit handle to the signed-in user's credentials.
///
/// The caller owns its lifetime and decides whether to persist it.
#[derive(Debug, Clone)]
pub struct Session {
    record: TokenRecord,
}

impl Session {
    pub fn new(record: TokenRecord) -> Self {
        Self { record }
    }

    pub fn access_token(&self) -> &str {
        &self.record.access_token
    }

    pub fn record(&self) -> &TokenRecord {
        &self.record
    }
}

pub fn validate(record: &TokenRecord) -> Validity {
    validate_at(record, Utc::now())
}

pub fn validate_at(record: &TokenRecord, now: DateTime<Utc>) -> Validity {
    if !record.has_required_scope() {
        return Validity::Invalid;
    }

    let access_usable = !record.access_token.is_empty()
        && record
            .expiry
            .is_none_or(|expiry| expiry - Duration::seconds(EXPIRY_SKEW_SECS) > now);

    if access_usable {
        Validity::Valid
    } else if record.has_refresh_token() {
        Validity::Expired
    } else {
        Validity::Invalid
    }
}

/// Trades the record's refresh token for a new access token.
///
/// Every failure is `RefreshDenied`; the caller must discard the record.
pub async fn refresh(
    record: &TokenRecord,
    config: &ClientConfig,
    http: &reqwest::Client,
) -> Result<TokenRecord, AuthError> {
    let refresh_token = record
        .refresh_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AuthError::RefreshDenied("no refresh token is stored".to_string()))?;

    if record.client_id != config.client_id {
        return Err(AuthError::RefreshDenied(
            "stored credentials were issued to a different OAuth client".to_string(),
        ));
    }

    let client = oauth::build_client(config)
        .map_err(|err| AuthError::RefreshDenied(err.to_string()))?;

    debug!(token_uri = %config.token_uri, "refreshing access token");
    let response = client
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .request_async(http)
        .await
        .map_err(|err| {
            let reason = describe_token_error(&err);
            warn!(%reason, "token refresh denied");
            AuthError::RefreshDenied(reason)
        })?;

    Ok(record_from_response(
        &response,
        config,
        &record.scopes,
        record.refresh_token.clone(),
        Utc::now(),
    ))
}

pub(crate) fn record_from_response(
    response: &BasicTokenResponse,
    config: &ClientConfig,
    fallback_scopes: &ScopeSet,
    fallback_refresh_token: Option<String>,
    now: DateTime<Utc>,
) -> TokenRecord {
    let scopes = response
        .scopes()
        .map(|scopes| scopes.iter().map(|scope| scope.to_string()).collect())
        .unwrap_or_else(|| fallback_scopes.clone());

    let expiry = response
        .expires_in()
        .and_then(|lifetime| Duration::from_std(lifetime).ok())
        .map(|lifetime| now + lifetime);

    TokenRecord {
        access_token: response.access_token().secret().to_string(),
        refresh_token: response
            .refresh_token()
            .map(|token| token.secret().to_string())
            .or(fallback_refresh_token),
        token_uri: config.token_uri.clone(),
        client_id: config.client_id.clone(),
        client_secret: config.client_secret.clone(),
        scopes,
        expiry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_record() -> TokenRecord {
        TokenRecord {
            access_token: "ya29.access".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            client_id: "client-123".to_string(),
            client_secret: "s3cret".to_string(),
            scopes: required_scopes(),
            expiry: Some(Utc.with_ymd_and_hms(2024, 1, 7, 12, 0, 0).unwrap()),
        }
    }

    fn config_for(server: &MockServer) -> ClientConfig {
        ClientConfig {
            client_id: "client-123".to_string(),
            client_secret: "s3cret".to_string(),
            auth_uri: format!("{}/auth", server.uri()),
            token_uri: format!("{}/token", server.uri()),
            redirect_uris: Vec::new(),
        }
    }

    #[test]
    fn serialization_round_trip_preserves_every_field() {
        let mut record = sample_record();
        record.access_token = "tok/with+odd=chars\u{e9}".to_string();
        record.scopes.insert("openid".to_string());
        record.expiry = Some(Utc.timestamp_nanos(1_704_628_800_123_456_789));

        let raw = record.serialize().unwrap();
        assert_eq!(TokenRecord::deserialize(&raw).unwrap(), record);
    }

    #[test]
    fn serialized_form_uses_stable_keys() {
        let raw = sample_record().serialize().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        for key in [
            "token",
            "refresh_token",
            "token_uri",
            "client_id",
            "client_secret",
            "scopes",
            "expiry",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn debug_output_never_contains_secrets() {
        let rendered = format!("{:?}", sample_record());
        assert!(!rendered.contains("ya29.access"));
        assert!(!rendered.contains("1//refresh"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn validate_reports_valid_expired_and_invalid() {
        let record = sample_record();
        let before = Utc.with_ymd_and_hms(2024, 1, 7, 11, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 7, 13, 0, 0).unwrap();

        assert_eq!(validate_at(&record, before), Validity::Valid);
        assert_eq!(validate_at(&record, after), Validity::Expired);

        let mut no_refresh = record.clone();
        no_refresh.refresh_token = None;
        assert_eq!(validate_at(&no_refresh, after), Validity::Invalid);
    }

    #[test]
    fn validate_treats_near_expiry_as_expired() {
        let record = sample_record();
        let almost = Utc.with_ymd_and_hms(2024, 1, 7, 11, 59, 50).unwrap();
        assert_eq!(validate_at(&record, almost), Validity::Expired);
    }

    #[test]
    fn validate_requires_read_only_scope() {
        let mut record = sample_record();
        record.scopes = ScopeSet::from(["openid".to_string()]);
        let before = Utc.with_ymd_and_hms(2024, 1, 7, 11, 0, 0).unwrap();
        assert_eq!(validate_at(&record, before), Validity::Invalid);
    }

    #[test]
    fn missing_access_token_with_refresh_token_needs_refresh() {
        let mut record = sample_record();
        record.access_token.clear();
        record.expiry = None;
        assert_eq!(validate_at(&record, Utc::now()), Validity::Expired);

        record.refresh_token = Some(String::new());
        assert_eq!(validate_at(&record, Utc::now()), Validity::Invalid);
    }

    #[tokio::test]
    async fn refresh_replaces_access_token_and_keeps_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;

        let record = sample_record();
        let refreshed = refresh(&record, &config_for(&server), &reqwest::Client::new())
            .await
            .unwrap();

        assert_eq!(refreshed.access_token, "ya29.fresh");
        assert_eq!(refreshed.refresh_token, record.refresh_token);
        assert_eq!(refreshed.scopes, record.scopes);
        assert!(refreshed.expiry.unwrap() > Utc::now());
        assert_eq!(validate(&refreshed), Validity::Valid);
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_denied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let err = refresh(&sample_record(), &config_for(&server), &reqwest::Client::new())
            .await
            .unwrap_err();

        match err {
            AuthError::RefreshDenied(reason) => assert!(reason.contains("invalid_grant")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_is_denied_locally() {
        let server = MockServer::start().await;
        let mut record = sample_record();
        record.refresh_token = None;

        let err = refresh(&record, &config_for(&server), &reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RefreshDenied(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_rejects_records_from_another_client() {
        let server = MockServer::start().await;
        let mut record = sample_record();
        record.client_id = "someone-else".to_string();

        let err = refresh(&record, &config_for(&server), &reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RefreshDenied(_)));
    }
}
