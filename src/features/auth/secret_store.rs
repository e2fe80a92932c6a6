use crate::error::{AppError, AppResult};
use crate::features::auth::models::SecretConfig;
use age::scrypt::Identity as ScryptIdentity;
use age::scrypt::Recipient as ScryptRecipient;
use age::secrecy::{ExposeSecret, SecretString};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const KEYRING_SERVICE: &str = "gsc-report";
const SECRETS_FILE: &str = "secrets.age";
const SECRETS_VERSION: u8 = 1;

#[derive(Debug, Clone)]
pub struct SecretStoreInfo {
    pub service: String,
    pub account: String,
    pub file_path: PathBuf,
}

/// Where the passphrase protecting the secrets file lives.
#[derive(Clone)]
enum KeySource {
    Keyring,
    #[cfg(test)]
    Fixed(SecretString),
}

/// age-encrypted secrets file whose passphrase is kept in the OS keyring.
#[derive(Clone)]
pub struct SecretStore {
    config_dir: PathBuf,
    key_source: KeySource,
}

#[derive(Debug, Serialize, Deserialize)]
struct SecretsEnvelope {
    version: u8,
    secrets: SecretConfig,
}

impl SecretStore {
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            config_dir,
            key_source: KeySource::Keyring,
        }
    }

    #[cfg(test)]
    fn with_passphrase(config_dir: PathBuf, passphrase: &str) -> Self {
        Self {
            config_dir,
            key_source: KeySource::Fixed(SecretString::from(passphrase.to_string())),
        }
    }

    pub fn info(&self) -> SecretStoreInfo {
        SecretStoreInfo {
            service: KEYRING_SERVICE.to_string(),
            account: self.keyring_account(),
            file_path: self.secrets_path(),
        }
    }

    pub fn load(&self) -> AppResult<SecretConfig> {
        let path = self.secrets_path();
        if !path.exists() {
            return Ok(SecretConfig::default());
        }

        let ciphertext = fs::read(&path).map_err(|err| {
            AppError::secure_storage(format!(
                "Failed to read secrets file {}: {err}",
                path.display()
            ))
        })?;

        let identity = ScryptIdentity::new(self.passphrase()?);
        let plaintext = age::decrypt(&identity, &ciphertext).map_err(|err| {
            AppError::secure_storage(format!(
                "Failed to decrypt secrets file {}: {err}",
                path.display()
            ))
        })?;

        let envelope: SecretsEnvelope = serde_json::from_slice(&plaintext).map_err(|err| {
            AppError::secure_storage(format!(
                "Secrets file {} is corrupt: {err}",
                path.display()
            ))
        })?;

        if envelope.version > SECRETS_VERSION {
            return Err(AppError::secure_storage(format!(
                "Secrets file version {} is newer than supported version {SECRETS_VERSION}.",
                envelope.version
            )));
        }

        Ok(envelope.secrets)
    }

    pub fn save(&self, secrets: &SecretConfig) -> AppResult<()> {
        fs::create_dir_all(&self.config_dir).map_err(|err| {
            AppError::secure_storage(format!(
                "Failed to create config directory {}: {err}",
                self.config_dir.display()
            ))
        })?;

        let envelope = SecretsEnvelope {
            version: SECRETS_VERSION,
            secrets: secrets.clone(),
        };
        let plaintext = serde_json::to_vec(&envelope)
            .map_err(|err| AppError::secure_storage(format!("Failed to encode secrets: {err}")))?;

        let recipient = ScryptRecipient::new(self.passphrase()?);
        let ciphertext = age::encrypt(&recipient, &plaintext)
            .map_err(|err| AppError::secure_storage(format!("Failed to encrypt secrets: {err}")))?;

        let path = self.secrets_path();
        write_private_file(&path, &ciphertext)
    }

    fn passphrase(&self) -> AppResult<SecretString> {
        match &self.key_source {
            KeySource::Keyring => self.keyring_passphrase(),
            #[cfg(test)]
            KeySource::Fixed(passphrase) => Ok(passphrase.clone()),
        }
    }

    fn keyring_passphrase(&self) -> AppResult<SecretString> {
        let account = self.keyring_account();
        let entry = Entry::new(KEYRING_SERVICE, &account).map_err(|err| {
            AppError::secure_storage(format!(
                "Failed to open keyring entry (service={KEYRING_SERVICE}, account={account}): {err}"
            ))
        })?;

        match entry.get_password() {
            Ok(password) => Ok(SecretString::from(password)),
            Err(keyring::Error::NoEntry) => {
                let bytes: [u8; 32] = rand::random();
                let generated = SecretString::from(BASE64_STANDARD.encode(bytes));
                entry.set_password(generated.expose_secret()).map_err(|err| {
                    AppError::secure_storage(format!(
                        "Failed to store keyring secret (service={KEYRING_SERVICE}, account={account}): {err}"
                    ))
                })?;
                Ok(generated)
            }
            Err(err) => Err(AppError::secure_storage(format!(
                "Failed to load keyring secret (service={KEYRING_SERVICE}, account={account}): {err}"
            ))),
        }
    }

    fn secrets_path(&self) -> PathBuf {
        self.config_dir.join(SECRETS_FILE)
    }

    // One keyring entry per config directory.
    fn keyring_account(&self) -> String {
        let canonical = self
            .config_dir
            .canonicalize()
            .unwrap_or_else(|_| self.config_dir.clone());
        let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
        let hex = format!("{digest:x}");
        format!("secrets|{}", &hex[..16])
    }
}

/// Writes through a temporary sibling and renames it into place with 0600.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> AppResult<()> {
    let dir = path.parent().ok_or_else(|| {
        AppError::secure_storage(format!("{} has no parent directory", path.display()))
    })?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let tmp_path = dir.join(format!(".{file_name}.tmp-{}-{nonce}", std::process::id()));

    let write_tmp = || -> std::io::Result<()> {
        let mut tmp_file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)?;
        tmp_file.write_all(contents)?;
        tmp_file.sync_all()?;
        restrict_permissions(&tmp_path)
    };

    write_tmp()
        .and_then(|()| fs::rename(&tmp_path, path))
        .map_err(|err| {
            let _ = fs::remove_file(&tmp_path);
            AppError::secure_storage(format!("Failed to write {}: {err}", path.display()))
        })
}

fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}
