use crate::error::{AuthError, ConfigError};
use crate::features::auth::client_config::ClientConfig;
use crate::features::auth::credentials::{self, REQUIRED_SCOPE, ScopeSet, TokenRecord};
use chrono::Utc;
use oauth2::basic::{BasicClient, BasicErrorResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl,
    RequestTokenError, Scope, TokenUrl,
};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

pub type OAuthClient = BasicClient<
    oauth2::EndpointSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointSet,
>;

pub fn build_client(config: &ClientConfig) -> Result<OAuthClient, ConfigError> {
    let auth_url = AuthUrl::new(config.auth_uri.clone())
        .map_err(|err| ConfigError::Invalid(format!("auth_uri: {err}")))?;
    let token_url = TokenUrl::new(config.token_uri.clone())
        .map_err(|err| ConfigError::Invalid(format!("token_uri: {err}")))?;

    Ok(BasicClient::new(ClientId::new(config.client_id.clone()))
        .set_client_secret(ClientSecret::new(config.client_secret.clone()))
        .set_auth_type(AuthType::RequestBody)
        .set_auth_uri(auth_url)
        .set_token_uri(token_url))
}

/// HTTP client for token endpoint calls. Redirects are refused so a code or
/// refresh token is never replayed to another host.
pub fn token_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
}

pub(crate) fn describe_token_error<RE>(err: &RequestTokenError<RE, BasicErrorResponse>) -> String
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => match response.error_description() {
            Some(description) => format!("{}: {description}", response.error()),
            None => response.error().to_string(),
        },
        RequestTokenError::Request(inner) => match std::error::Error::source(inner) {
            Some(source) => format!("request to token endpoint failed: {source}"),
            None => format!("request to token endpoint failed: {inner}"),
        },
        RequestTokenError::Parse(inner, _) => format!("unexpected token response: {inner}"),
        RequestTokenError::Other(message) => message.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Unauthenticated,
    AwaitingCode {
        redirect_uri: String,
        csrf_state: String,
    },
    Authenticated,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub csrf_state: String,
}

/// Drives one delegated-authorization handshake.
///
/// `begin` and `complete` must see the same redirect URI byte for byte; the
/// authorization server rejects the exchange otherwise. Authorization codes
/// are single-use, so concurrent `complete` calls with the same code are
/// refused instead of raced.
pub struct AuthorizationFlow {
    config: ClientConfig,
    oauth: OAuthClient,
    scopes: ScopeSet,
    http: reqwest::Client,
    state: Mutex<FlowState>,
    in_flight: Mutex<HashSet<String>>,
}

impl AuthorizationFlow {
    pub fn new(
        config: ClientConfig,
        scopes: ScopeSet,
        http: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let oauth = build_client(&config)?;

        Ok(Self {
            config,
            oauth,
            scopes,
            http,
            state: Mutex::new(FlowState::Unauthenticated),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn state(&self) -> FlowState {
        self.lock_state().clone()
    }

    /// Abandons any handshake in progress.
    pub fn reset(&self) {
        *self.lock_state() = FlowState::Unauthenticated;
    }

    pub fn begin(&self, redirect_uri: &str) -> Result<AuthorizationRequest, ConfigError> {
        let redirect = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|err| ConfigError::Invalid(format!("redirect_uri: {err}")))?;

        let (url, csrf_token) = self
            .oauth
            .clone()
            .set_redirect_uri(redirect)
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .add_extra_param("include_granted_scopes", "true")
            .url();

        let csrf_state = csrf_token.secret().to_string();
        *self.lock_state() = FlowState::AwaitingCode {
            redirect_uri: redirect_uri.to_string(),
            csrf_state: csrf_state.clone(),
        };

        Ok(AuthorizationRequest {
            url: url.to_string(),
            csrf_state,
        })
    }

    pub async fn complete(&self, redirect_uri: &str, code: &str) -> Result<TokenRecord, AuthError> {
        {
            let mut state = self.lock_state();
            let expected = match &*state {
                FlowState::AwaitingCode { redirect_uri, .. } => redirect_uri.clone(),
                _ => {
                    return Err(AuthError::ExchangeFailed(
                        "no authorization is in progress; start the sign-in again".to_string(),
                    ));
                }
            };

            if expected.as_bytes() != redirect_uri.as_bytes() {
                let reason = format!(
                    "redirect URI mismatch: authorization used {expected}, exchange used {redirect_uri}"
                );
                *state = FlowState::Failed {
                    reason: reason.clone(),
                };
                return Err(AuthError::ExchangeFailed(reason));
            }
        }

        if !self.lock_in_flight().insert(code.to_string()) {
            return Err(AuthError::ExchangeFailed(
                "this authorization code is already being exchanged".to_string(),
            ));
        }

        let result = self.exchange(redirect_uri, code).await;
        self.lock_in_flight().remove(code);

        let mut state = self.lock_state();
        let still_awaiting = matches!(
            &*state,
            FlowState::AwaitingCode { redirect_uri: current, .. } if current == redirect_uri
        );
        match &result {
            Ok(_) => {
                info!("authorization code exchanged");
                *state = FlowState::Authenticated;
            }
            Err(err) if still_awaiting => {
                warn!(error = %err, "authorization code exchange failed");
                *state = FlowState::Failed {
                    reason: err.to_string(),
                };
            }
            Err(err) => warn!(error = %err, "authorization code exchange failed"),
        }

        result
    }

    async fn exchange(&self, redirect_uri: &str, code: &str) -> Result<TokenRecord, AuthError> {
        let redirect = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|err| AuthError::ExchangeFailed(format!("invalid redirect_uri: {err}")))?;

        let response = self
            .oauth
            .clone()
            .set_redirect_uri(redirect)
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|err| AuthError::ExchangeFailed(describe_token_error(&err)))?;

        let record = credentials::record_from_response(
            &response,
            &self.config,
            &self.scopes,
            None,
            Utc::now(),
        );

        if !record.has_required_scope() {
            return Err(AuthError::ExchangeFailed(format!(
                "the grant does not include {REQUIRED_SCOPE}; approve read-only Search Console access"
            )));
        }

        Ok(record)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FlowState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::auth::credentials::required_scopes;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REDIRECT: &str = "http://127.0.0.1:45455/callback";

    fn config_for(base: &str) -> ClientConfig {
        ClientConfig {
            client_id: "client-123".to_string(),
            client_secret: "s3cret".to_string(),
            auth_uri: format!("{base}/auth"),
            token_uri: format!("{base}/token"),
            redirect_uris: vec![REDIRECT.to_string()],
        }
    }

    fn flow_for(base: &str) -> AuthorizationFlow {
        AuthorizationFlow::new(config_for(base), required_scopes(), reqwest::Client::new()).unwrap()
    }

    fn token_body() -> serde_json::Value {
        serde_json::json!({
            "access_token": "ya29.access",
            "token_type": "Bearer",
            "expires_in": 3599,
            "refresh_token": "1//refresh",
            "scope": REQUIRED_SCOPE
        })
    }

    #[test]
    fn consent_url_requests_offline_access_and_exact_redirect() {
        let flow = flow_for("https://accounts.example.com");
        let request = flow.begin(REDIRECT).unwrap();

        let url = url::Url::parse(&request.url).unwrap();
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["include_granted_scopes"], "true");
        assert_eq!(params["redirect_uri"], REDIRECT);
        assert_eq!(params["scope"], REQUIRED_SCOPE);
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["state"], request.csrf_state);

        assert_eq!(
            flow.state(),
            FlowState::AwaitingCode {
                redirect_uri: REDIRECT.to_string(),
                csrf_state: request.csrf_state,
            }
        );
    }

    #[test]
    fn begin_rejects_unparsable_redirect() {
        let flow = flow_for("https://accounts.example.com");
        assert!(matches!(
            flow.begin("not a url"),
            Err(ConfigError::Invalid(_))
        ));
        assert_eq!(flow.state(), FlowState::Unauthenticated);
    }

    #[tokio::test]
    async fn complete_exchanges_code_for_token_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=auth-code"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let flow = flow_for(&server.uri());
        flow.begin(REDIRECT).unwrap();
        let record = flow.complete(REDIRECT, "auth-code").await.unwrap();

        assert_eq!(record.access_token, "ya29.access");
        assert_eq!(record.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(record.client_id, "client-123");
        assert_eq!(record.token_uri, format!("{}/token", server.uri()));
        assert!(record.has_required_scope());
        assert_eq!(flow.state(), FlowState::Authenticated);
    }

    #[tokio::test]
    async fn redirect_uri_must_match_byte_for_byte() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(0)
            .mount(&server)
            .await;

        let flow = flow_for(&server.uri());
        flow.begin(REDIRECT).unwrap();

        let err = flow
            .complete("http://127.0.0.1:45455/callback/", "auth-code")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ExchangeFailed(_)));
        assert!(matches!(flow.state(), FlowState::Failed { .. }));

        flow.reset();
        assert_eq!(flow.state(), FlowState::Unauthenticated);
    }

    #[tokio::test]
    async fn rejected_code_moves_flow_to_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Malformed auth code."
            })))
            .mount(&server)
            .await;

        let flow = flow_for(&server.uri());
        flow.begin(REDIRECT).unwrap();
        let err = flow.complete(REDIRECT, "expired").await.unwrap_err();

        match err {
            AuthError::ExchangeFailed(reason) => assert!(reason.contains("invalid_grant")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(flow.state(), FlowState::Failed { .. }));
    }

    #[tokio::test]
    async fn grant_without_required_scope_fails() {
        let server = MockServer::start().await;
        let mut body = token_body();
        body["scope"] = serde_json::json!("openid email");
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let flow = flow_for(&server.uri());
        flow.begin(REDIRECT).unwrap();
        let err = flow.complete(REDIRECT, "auth-code").await.unwrap_err();
        assert!(matches!(err, AuthError::ExchangeFailed(_)));
    }

    #[tokio::test]
    async fn complete_without_begin_fails() {
        let flow = flow_for("https://accounts.example.com");
        let err = flow.complete(REDIRECT, "auth-code").await.unwrap_err();
        assert!(matches!(err, AuthError::ExchangeFailed(_)));
        assert_eq!(flow.state(), FlowState::Unauthenticated);
    }

    #[tokio::test]
    async fn code_cannot_be_exchanged_twice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let flow = flow_for(&server.uri());
        flow.begin(REDIRECT).unwrap();
        flow.complete(REDIRECT, "auth-code").await.unwrap();

        let err = flow.complete(REDIRECT, "auth-code").await.unwrap_err();
        assert!(matches!(err, AuthError::ExchangeFailed(_)));
        assert_eq!(flow.state(), FlowState::Authenticated);
    }

    #[tokio::test]
    async fn concurrent_exchange_of_same_code_is_single_flight() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body())
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let flow = flow_for(&server.uri());
        flow.begin(REDIRECT).unwrap();

        let (first, second) = tokio::join!(
            flow.complete(REDIRECT, "auth-code"),
            flow.complete(REDIRECT, "auth-code")
        );

        let outcomes = [first.is_ok(), second.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(flow.state(), FlowState::Authenticated);
    }
}
