use crate::error::{AppError, AppResult, ConfigError};
use crate::features::auth::client_config::{self, ClientConfig, ClientConfigSource};
use crate::features::auth::credentials::TokenRecord;
use crate::features::auth::models::{
    AppConfig, IntegrationDefaults, IntegrationStatus, ReportConfig, SecretConfig, SessionConfig,
};
use crate::features::auth::secret_store::{SecretStore, write_private_file};
use colored::Colorize;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

const APP_CONFIG_DIR_ENV: &str = "GSC_REPORT_CONFIG_DIR";
const CLIENT_SECRET_JSON_ENV: &str = "GSC_CLIENT_SECRET_JSON";
const CLIENT_SECRETS_FILE_ENV: &str = "GSC_CLIENT_SECRETS_FILE";
const REDIRECT_URI_ENV: &str = "GSC_REDIRECT_URI";
const APP_NAME: &str = "gsc-report";
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:45455/callback";

pub fn set_integration(
    source: ClientConfigSource,
    redirect_uri: Option<String>,
) -> AppResult<ClientConfig> {
    let (config, raw) = client_config::load_client_config(&source)?;
    if let Some(redirect_uri) = redirect_uri.as_deref() {
        validate_redirect_uri(redirect_uri)?;
    }

    let mut secrets = load_secrets()?;
    secrets.client_secret_json = Some(raw);
    save_secrets(&secrets)?;

    let mut app_config = load_config()?;
    app_config.integration.client_id = Some(config.client_id.clone());
    if redirect_uri.is_some() {
        app_config.integration.redirect_uri = redirect_uri;
    }
    save_config(&app_config)?;

    Ok(config)
}

pub fn show_integration() -> AppResult<IntegrationStatus> {
    let config = load_config()?;
    let secrets = load_secrets()?;

    Ok(IntegrationStatus {
        has_client_config: secrets.client_secret_json.is_some(),
        has_redirect_uri: config.integration.redirect_uri.is_some(),
        client_id: config.integration.client_id.as_deref().map(redact_value),
        redirect_uri: config.integration.redirect_uri,
    })
}

pub fn integration_defaults() -> AppResult<IntegrationDefaults> {
    let config = load_config()?;

    Ok(IntegrationDefaults {
        redirect_uri: config.integration.redirect_uri,
    })
}

pub fn clear_integration_only() -> AppResult<()> {
    let mut secrets = load_secrets()?;
    secrets.client_secret_json = None;
    save_secrets(&secrets)?;

    let mut config = load_config()?;
    config.integration.client_id = None;
    config.integration.redirect_uri = None;
    save_config(&config)
}

pub fn clear_session() -> AppResult<()> {
    let mut secrets = load_secrets()?;
    secrets.token_record = None;
    save_secrets(&secrets)?;

    let mut config = load_config()?;
    config.session = SessionConfig::default();
    save_config(&config)
}

pub fn clear_integration_and_session() -> AppResult<()> {
    clear_integration_only()?;
    clear_session()
}

pub fn save_token_record(record: &TokenRecord) -> AppResult<()> {
    let serialized = record
        .serialize()
        .map_err(|err| AppError::secure_storage(format!("Failed to encode session: {err}")))?;

    let mut secrets = load_secrets()?;
    secrets.token_record = Some(serialized);
    save_secrets(&secrets)?;

    let mut config = load_config()?;
    config.session.updated_at = Some(now_unix_timestamp());
    save_config(&config)
}

pub fn load_token_record() -> AppResult<Option<TokenRecord>> {
    let secrets = load_secrets()?;
    secrets
        .token_record
        .as_deref()
        .map(TokenRecord::deserialize)
        .transpose()
        .map_err(|err| {
            AppError::secure_storage(format!(
                "Stored session is unreadable ({err}). Run `gsc-report logout` and log in again."
            ))
        })
}

/// A client identity plus the raw JSON it was parsed from.
pub struct ResolvedClient {
    pub config: ClientConfig,
    raw: String,
    from_store: bool,
}

/// Resolves the client identity: flag, then environment, then the stored copy.
pub fn resolve_client(client_secrets: Option<PathBuf>) -> AppResult<ResolvedClient> {
    let env_json = env_value(CLIENT_SECRET_JSON_ENV);
    let env_path = env_value(CLIENT_SECRETS_FILE_ENV).map(PathBuf::from);
    let from_store = client_secrets.is_none() && env_json.is_none() && env_path.is_none();
    let stored = load_secrets()?.client_secret_json;

    let source = select_client_source(client_secrets, env_json, env_path, stored)
        .ok_or_else(|| ConfigError::Missing("no client_secret.json was provided".to_string()))?;
    let (config, raw) = client_config::load_client_config(&source)?;

    Ok(ResolvedClient {
        config,
        raw,
        from_store,
    })
}

pub fn resolve_client_config(client_secrets: Option<PathBuf>) -> AppResult<ClientConfig> {
    Ok(resolve_client(client_secrets)?.config)
}

/// Stores a flag or environment supplied identity so later refreshes can find it.
pub fn remember_client(resolved: &ResolvedClient) -> AppResult<()> {
    if resolved.from_store {
        return Ok(());
    }

    let mut secrets = load_secrets()?;
    secrets.client_secret_json = Some(resolved.raw.clone());
    save_secrets(&secrets)?;

    let mut config = load_config()?;
    config.integration.client_id = Some(resolved.config.client_id.clone());
    save_config(&config)
}

pub fn resolve_redirect_uri(
    override_uri: Option<String>,
    client: &ClientConfig,
) -> AppResult<String> {
    let config = load_config()?;
    let redirect_uri = pick_value(
        override_uri,
        env_value(REDIRECT_URI_ENV),
        config.integration.redirect_uri,
    )
    .or_else(|| registered_loopback_redirect(client))
    .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());

    validate_redirect_uri(&redirect_uri)?;
    Ok(redirect_uri)
}

pub fn report_config() -> AppResult<ReportConfig> {
    Ok(load_config()?.report)
}

pub fn print_secret_store_location() -> AppResult<()> {
    let info = secret_store()?.info();

    eprintln!(
        "{}",
        format!(
            "using secret store: keyring service={} account={}",
            info.service, info.account
        )
        .bright_black()
    );
    eprintln!(
        "{}",
        format!("using secret file: {}", info.file_path.display()).bright_black()
    );

    Ok(())
}

fn select_client_source(
    flag_path: Option<PathBuf>,
    env_json: Option<String>,
    env_path: Option<PathBuf>,
    stored_json: Option<String>,
) -> Option<ClientConfigSource> {
    flag_path
        .map(ClientConfigSource::File)
        .or_else(|| env_json.map(ClientConfigSource::Json))
        .or_else(|| env_path.map(ClientConfigSource::File))
        .or_else(|| stored_json.map(ClientConfigSource::Json))
}

// A registered loopback redirect with an explicit port can be served locally.
fn registered_loopback_redirect(client: &ClientConfig) -> Option<String> {
    client
        .redirect_uris
        .iter()
        .find(|uri| {
            Url::parse(uri).is_ok_and(|parsed| {
                parsed.scheme() == "http"
                    && matches!(parsed.host_str(), Some("127.0.0.1") | Some("localhost"))
                    && parsed.port().is_some()
            })
        })
        .cloned()
}

fn pick_value(
    primary: Option<String>,
    secondary: Option<String>,
    tertiary: Option<String>,
) -> Option<String> {
    [primary, secondary, tertiary]
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn validate_redirect_uri(redirect_uri: &str) -> AppResult<()> {
    let parsed = Url::parse(redirect_uri)
        .map_err(|err| AppError::invalid_input(format!("Invalid redirect_uri: {err}")))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::invalid_input(
            "redirect_uri must use http or https scheme.",
        ));
    }

    if parsed.host_str().is_none() {
        return Err(AppError::invalid_input("redirect_uri must include a host."));
    }

    Ok(())
}

fn redact_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }

    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}***{suffix}")
}

fn now_unix_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
        .to_string()
}

fn config_dir() -> AppResult<PathBuf> {
    if let Ok(path) = env::var(APP_CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(path));
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(path) = env::var("APPDATA") {
            return Ok(PathBuf::from(path).join(APP_NAME));
        }
    }

    if let Ok(path) = env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(path).join(APP_NAME));
    }

    if let Ok(path) = env::var("HOME") {
        return Ok(PathBuf::from(path).join(".config").join(APP_NAME));
    }

    Err(AppError::generic(format!(
        "Could not determine config directory. Set HOME, XDG_CONFIG_HOME, or {APP_CONFIG_DIR_ENV}."
    )))
}

fn ensure_config_dir() -> AppResult<PathBuf> {
    let dir = config_dir()?;
    fs::create_dir_all(&dir).map_err(|err| {
        AppError::generic(format!(
            "Failed to create config directory {}: {err}",
            dir.display()
        ))
    })?;
    Ok(dir)
}

fn load_config() -> AppResult<AppConfig> {
    let path = ensure_config_dir()?.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let raw = fs::read_to_string(&path).map_err(|err| {
        AppError::generic(format!("Failed to read config {}: {err}", path.display()))
    })?;
    if raw.trim().is_empty() {
        return Ok(AppConfig::default());
    }

    serde_json::from_str(&raw).map_err(|err| {
        AppError::generic(format!("Failed to parse config {}: {err}", path.display()))
    })
}

fn save_config(config: &AppConfig) -> AppResult<()> {
    let path = ensure_config_dir()?.join(CONFIG_FILE);
    let serialized = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::generic(format!("Failed to encode config: {err}")))?;
    write_private_file(&path, format!("{serialized}\n").as_bytes())
}

fn load_secrets() -> AppResult<SecretConfig> {
    secret_store()?.load()
}

fn save_secrets(secrets: &SecretConfig) -> AppResult<()> {
    secret_store()?.save(secrets)
}

fn secret_store() -> AppResult<SecretStore> {
    Ok(SecretStore::new(ensure_config_dir()?))
}
