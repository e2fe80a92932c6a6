use crate::error::AuthError;
use crate::features::auth::client_config::ClientConfig;
use crate::features::auth::credentials::{self, Session, TokenRecord, Validity};
use tracing::{debug, info};

/// A usable session, and whether its record changed and should be persisted.
#[derive(Debug)]
pub struct ActiveSession {
    pub session: Session,
    pub refreshed: bool,
}

/// Turns a stored record into a usable session, refreshing it if expired.
///
/// `Invalid` records and denied refreshes both fail with `RefreshDenied`; the
/// caller must discard the stored record in that case.
pub async fn activate(
    record: TokenRecord,
    config: &ClientConfig,
    http: &reqwest::Client,
) -> Result<ActiveSession, AuthError> {
    match credentials::validate(&record) {
        Validity::Valid => {
            debug!("stored access token is still valid");
            Ok(ActiveSession {
                session: Session::new(record),
                refreshed: false,
            })
        }
        Validity::Expired => {
            info!("access token expired; refreshing");
            let refreshed = credentials::refresh(&record, config, http).await?;
            Ok(ActiveSession {
                session: Session::new(refreshed),
                refreshed: true,
            })
        }
        Validity::Invalid => Err(AuthError::RefreshDenied(
            "stored session lacks the read-only scope or a refresh token".to_string(),
        )),
    }
}

/// Forces a refresh of a session the reporting API rejected.
pub async fn renew(
    session: &Session,
    config: &ClientConfig,
    http: &reqwest::Client,
) -> Result<Session, AuthError> {
    let refreshed = credentials::refresh(session.record(), config, http).await?;
    Ok(Session::new(refreshed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::auth::credentials::required_scopes;
    use chrono::{Duration, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(expiry_offset_secs: i64, refresh_token: Option<&str>) -> TokenRecord {
        TokenRecord {
            access_token: "ya29.old".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            token_uri: "unused".to_string(),
            client_id: "client-123".to_string(),
            client_secret: "s3cret".to_string(),
            scopes: required_scopes(),
            expiry: Some(Utc::now() + Duration::seconds(expiry_offset_secs)),
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

    #[tokio::test]
    async fn valid_record_is_used_without_network() {
        let server = MockServer::start().await;
        let active = activate(
            record(3600, Some("1//refresh")),
            &config_for(&server),
            &reqwest::Client::new(),
        )
        .await
        .unwrap();

        assert!(!active.refreshed);
        assert_eq!(active.session.access_token(), "ya29.old");
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn expired_record_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.new",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let active = activate(
            record(-60, Some("1//refresh")),
            &config_for(&server),
            &reqwest::Client::new(),
        )
        .await
        .unwrap();

        assert!(active.refreshed);
        assert_eq!(active.session.access_token(), "ya29.new");
        assert_eq!(
            active.session.record().refresh_token.as_deref(),
            Some("1//refresh")
        );
    }

    #[tokio::test]
    async fn revoked_refresh_token_forces_relogin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let err = activate(
            record(-60, Some("1//revoked")),
            &config_for(&server),
            &reqwest::Client::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::RefreshDenied(_)));
    }

    #[tokio::test]
    async fn invalid_record_is_denied_without_network() {
        let server = MockServer::start().await;
        let err = activate(record(-60, None), &config_for(&server), &reqwest::Client::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::RefreshDenied(_)));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
