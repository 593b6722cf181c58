use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use promoter_core::config::{AuthMode, GitHubConfig, SecretStoreConfig};
use serde::{Deserialize, Deserializer};
use tokio::sync::OnceCell;

/// Credentials document stored in the secret store.
#[derive(Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default, deserialize_with = "deserialize_app_id")]
    pub app_id: Option<u64>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &Option<String>) -> &'static str {
            if value.is_some() { "[redacted]" } else { "[unset]" }
        }
        f.debug_struct("Secrets")
            .field("app_id", &self.app_id)
            .field("private_key", &redact(&self.private_key))
            .field("webhook_secret", &redact(&self.webhook_secret))
            .field("token", &redact(&self.token))
            .finish()
    }
}

impl Secrets {
    /// The webhook secret, if one is configured and non-empty.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref().filter(|s| !s.is_empty())
    }
}

// Secret stores often keep the app id as a string.
fn deserialize_app_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where D: Deserializer<'de> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AppId {
        Number(u64),
        String(String),
    }
    match Option::<AppId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(AppId::Number(id)) => Ok(Some(id)),
        Some(AppId::String(s)) if s.trim().is_empty() => Ok(None),
        Some(AppId::String(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, key: &str, decrypt: bool) -> Result<String>;
}

/// Reads `<directory>/<key>`, e.g. a mounted secrets volume.
pub struct FileSecretStore {
    pub directory: PathBuf,
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret(&self, key: &str, _decrypt: bool) -> Result<String> {
        let path = self.directory.join(key);
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read secret {}", path.display()))
    }
}

pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, key: &str, _decrypt: bool) -> Result<String> {
        std::env::var(key).with_context(|| format!("Environment variable {key} not set"))
    }
}

pub struct StaticSecretStore {
    pub value: String,
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, _key: &str, _decrypt: bool) -> Result<String> {
        Ok(self.value.clone())
    }
}

pub fn secret_store(config: &SecretStoreConfig) -> Arc<dyn SecretStore> {
    match config {
        SecretStoreConfig::File { directory } => {
            Arc::new(FileSecretStore { directory: directory.clone() })
        }
        SecretStoreConfig::Env => Arc::new(EnvSecretStore),
        SecretStoreConfig::Inline { value } => Arc::new(StaticSecretStore { value: value.clone() }),
    }
}

/// Lazily loaded credentials. The first successful refresh is kept for the process lifetime.
pub struct Credentials {
    mode: AuthMode,
    key: String,
    store: Arc<dyn SecretStore>,
    secrets: OnceCell<Secrets>,
}

impl Credentials {
    pub fn new(mode: AuthMode, key: impl Into<String>, store: Arc<dyn SecretStore>) -> Self {
        Self { mode, key: key.into(), store, secrets: OnceCell::new() }
    }

    pub fn from_config(config: &GitHubConfig) -> Self {
        Self::new(config.auth, config.secret_key.clone(), secret_store(&config.secrets))
    }

    /// Credentials that never touch a secret store.
    pub fn with_secrets(mode: AuthMode, secrets: Secrets) -> Self {
        Self {
            mode,
            key: String::new(),
            store: Arc::new(StaticSecretStore { value: String::new() }),
            secrets: OnceCell::new_with(Some(secrets)),
        }
    }

    pub fn mode(&self) -> AuthMode { self.mode }

    pub fn is_loaded(&self) -> bool { self.secrets.initialized() }

    /// Returns the cached secrets, fetching them on first use.
    pub async fn refresh(&self) -> Result<&Secrets> {
        self.secrets
            .get_or_try_init(|| async {
                let raw = self
                    .store
                    .get_secret(&self.key, true)
                    .await
                    .with_context(|| format!("Failed to fetch credentials {}", self.key))?;
                let secrets: Secrets =
                    serde_json::from_str(&raw).context("Failed to parse credentials")?;
                validate(self.mode, &secrets)?;
                tracing::info!(mode = ?self.mode, "Loaded credentials");
                Ok::<_, anyhow::Error>(secrets)
            })
            .await
    }
}

fn validate(mode: AuthMode, secrets: &Secrets) -> Result<()> {
    match mode {
        AuthMode::App => {
            if secrets.app_id.is_none() {
                bail!("Credentials are missing app_id");
            }
            if secrets.private_key.as_deref().is_none_or(str::is_empty) {
                bail!("Credentials are missing private_key");
            }
        }
        AuthMode::Token => {
            if secrets.token.as_deref().is_none_or(str::is_empty) {
                bail!("Credentials are missing token");
            }
        }
    }
    if secrets.webhook_secret().is_none() {
        tracing::warn!("Credentials have no webhook_secret; every delivery will be rejected");
    }
    Ok(())
}
