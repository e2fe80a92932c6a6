use std::error::Error;
use std::fmt::{Display, Formatter};

pub type AppResult<T> = Result<T, AppError>;

pub const RELOGIN_HINT: &str = "Run `gsc-report login` to sign in again.";

#[derive(Debug, Clone)]
pub struct AppError {
    pub code: i32,
    pub message: String,
}

impl AppError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(1, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(2, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(3, message)
    }

    pub fn secure_storage(message: impl Into<String>) -> Self {
        Self::new(5, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(6, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(7, message)
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for AppError {}

/// Problems with the registered client identity. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("OAuth client configuration is missing: {0}")]
    Missing(String),
    #[error("OAuth client configuration could not be parsed: {0}")]
    Unparsable(String),
    #[error("OAuth client configuration is invalid: {0}")]
    Invalid(String),
}

/// Rejections from the authorization server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("token refresh was denied: {0}")]
    RefreshDenied(String),
}

/// Failures of reporting API calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("the reporting API rejected the session (401 Unauthorized): {0}")]
    Unauthorized(String),
    #[error("property {property} failed: {reason}")]
    PropertyFailed { property: String, reason: String },
    #[error("transient reporting API failure: {0}")]
    Transient(String),
    #[error("{context} failed with status {status}")]
    Status { status: u16, context: String },
    #[error("failed to decode {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        let hint = match err {
            ConfigError::Missing(_) => {
                "Provide the client_secret.json from Google Cloud Console via --client-secrets, GSC_CLIENT_SECRET_JSON, or `gsc-report integration set`."
            }
            ConfigError::Unparsable(_) | ConfigError::Invalid(_) => {
                "Make sure you supplied the entire client_secret.json downloaded from Google Cloud Console."
            }
        };
        Self::config(format!("{err}. {hint}"))
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        Self::auth(format!("{err}. {RELOGIN_HINT}"))
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(_) => Self::auth(format!("{err}. {RELOGIN_HINT}")),
            _ => Self::api(err.to_string()),
        }
    }
}
