use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub promotion: PromotionConfig,
    pub events: EventsConfig,
    pub feedback: FeedbackConfig,
    pub rate_limit: RateLimitConfig,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Upper bound for a single webhook delivery, including every GitHub call it makes.
    pub request_timeout_secs: u64,
    /// Extra time feedback gets past the request deadline to report a failure.
    pub feedback_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self { Self { port: 8080, request_timeout_secs: 30, feedback_grace_secs: 5 } }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }

    pub fn feedback_grace(&self) -> Duration { Duration::from_secs(self.feedback_grace_secs) }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// GitHub App: one installation client per `installation.id`.
    #[default]
    App,
    /// A single personal access token for every delivery.
    Token,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SecretStoreConfig {
    /// Secrets are read from `<directory>/<key>`.
    File { directory: PathBuf },
    /// Secrets are read from the environment variable named by the key.
    Env,
    /// Secrets are embedded in the config file.
    Inline { value: String },
}

impl Default for SecretStoreConfig {
    fn default() -> Self { Self::Env }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub auth: AuthMode,
    pub secrets: SecretStoreConfig,
    /// Key of the JSON credentials document in the secret store.
    pub secret_key: String,
    /// Evict cached installation clients after this many seconds. Unset keeps them forever.
    pub client_cache_ttl_secs: Option<u64>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            auth: AuthMode::App,
            secrets: SecretStoreConfig::Env,
            secret_key: "PROMOTER_CREDENTIALS".to_string(),
            client_cache_ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Repository custom property holding a comma-separated stage list.
    pub stages_property: String,
    /// Create a missing target branch from the root commit of the source branch.
    pub create_missing_target_branches: bool,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            stages_property: "promotion-stages".to_string(),
            create_missing_target_branches: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub push: bool,
    pub pull_request: bool,
    pub pull_request_review: bool,
    pub check_suite: bool,
    pub workflow_run: bool,
    pub deployment_status: bool,
    pub status: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            push: true,
            pull_request: true,
            pull_request_review: true,
            check_suite: true,
            workflow_run: true,
            deployment_status: true,
            status: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub commit_status: CommitStatusConfig,
    pub check_run: CheckRunConfig,
}

/// Message fields accept the `{source}`, `{target}`, `{progress}` and `{timestamp}` placeholders.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CommitStatusConfig {
    pub enabled: bool,
    pub context: String,
    pub description: String,
}

impl Default for CommitStatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context: "gitops-promoter".to_string(),
            description: "Promotion {source} → {target} ({progress})".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckRunConfig {
    pub enabled: bool,
    pub name: String,
    pub title: String,
    /// Replaces the built-in minijinja template for the check run summary.
    pub template: Option<PathBuf>,
}

impl Default for CheckRunConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "gitops-promoter".to_string(),
            title: "Promote {source} to {target} ({progress})".to_string(),
            template: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self { Self { enabled: false, interval_secs: 60 } }
}

impl RateLimitConfig {
    pub fn interval(&self) -> Duration { Duration::from_secs(self.interval_secs) }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    /// Empty disables uploads without raising an error.
    pub bucket: String,
    pub directory: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self { enabled: false, bucket: String::new(), directory: PathBuf::from("archive") }
    }
}
