use crate::features::auth::credentials::Validity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub integration: IntegrationConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub row_limit: Option<u32>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub updated_at: Option<String>,
}

/// Values that live in the encrypted store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretConfig {
    /// Full client_secret.json text as downloaded from Google Cloud Console.
    pub client_secret_json: Option<String>,
    /// Serialized `TokenRecord`.
    pub token_record: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IntegrationDefaults {
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginOutput {
    pub ok: bool,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct LogoutOutput {
    pub ok: bool,
    pub forgot_client: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub ok: bool,
    pub signed_in: bool,
    pub validity: Option<Validity>,
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
}

#[derive(Debug, Serialize)]
pub struct IntegrationStatus {
    pub has_client_config: bool,
    pub has_redirect_uri: bool,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
}
