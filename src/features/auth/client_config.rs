use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use url::Url;

pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Canonical identity of the registered OAuth application.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub redirect_uris: Vec<String>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .field("redirect_uris", &self.redirect_uris)
            .finish()
    }
}

/// Where a client_secret.json comes from.
#[derive(Debug, Clone)]
pub enum ClientConfigSource {
    Json(String),
    File(PathBuf),
}

#[derive(Debug, Deserialize)]
enum ClientSecretDocument {
    #[serde(rename = "web")]
    Web(RawClient),
    #[serde(rename = "installed")]
    Installed(RawClient),
}

#[derive(Debug, Deserialize)]
struct RawClient {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    auth_uri: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// Parses a source, also returning its raw text for storage.
pub fn load_client_config(
    source: &ClientConfigSource,
) -> Result<(ClientConfig, String), ConfigError> {
    let raw = read_source(source)?;
    let config = parse_client_config(&raw)?;
    Ok((config, raw))
}

/// Returns the raw JSON text behind a source.
pub fn read_source(source: &ClientConfigSource) -> Result<String, ConfigError> {
    match source {
        ClientConfigSource::Json(text) => Ok(text.clone()),
        ClientConfigSource::File(path) => fs::read_to_string(path).map_err(|err| {
            ConfigError::Missing(format!("cannot read {}: {err}", path.display()))
        }),
    }
}

pub fn parse_client_config(raw: &str) -> Result<ClientConfig, ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::Missing("client configuration is empty".to_string()));
    }

    let document: ClientSecretDocument = serde_json::from_str(raw).map_err(|err| {
        ConfigError::Unparsable(format!(
            "expected a JSON object with a single \"web\" or \"installed\" key ({err})"
        ))
    })?;

    let client = match document {
        ClientSecretDocument::Web(client) | ClientSecretDocument::Installed(client) => client,
    };

    normalize(client)
}

fn normalize(client: RawClient) -> Result<ClientConfig, ConfigError> {
    let client_id = required("client_id", client.client_id)?;
    let client_secret = required("client_secret", client.client_secret)?;
    let auth_uri = endpoint("auth_uri", client.auth_uri, GOOGLE_AUTH_URI)?;
    let token_uri = endpoint("token_uri", client.token_uri, GOOGLE_TOKEN_URI)?;

    let redirect_uris = client
        .redirect_uris
        .into_iter()
        .map(|uri| uri.trim().to_string())
        .filter(|uri| !uri.is_empty())
        .collect();

    Ok(ClientConfig {
        client_id,
        client_secret,
        auth_uri,
        token_uri,
        redirect_uris,
    })
}

fn required(field: &str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Missing(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn endpoint(field: &str, value: Option<String>, default: &str) -> Result<String, ConfigError> {
    let value = value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| default.to_string());

    Url::parse(&value)
        .map_err(|err| ConfigError::Invalid(format!("{field} is not a valid URL: {err}")))?;

    Ok(value)
}
