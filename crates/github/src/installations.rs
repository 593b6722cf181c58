use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use moka::future::Cache;
use octocrab::{Octocrab, models::InstallationId};
use promoter_core::config::AuthMode;

use crate::{GitHubApi, OctocrabApi, credentials::Secrets};

/// Cache key used for the single client of token mode.
const TOKEN_CLIENT_KEY: u64 = 0;

/// Builds authenticated clients. Called at most once per cache key.
pub trait ClientFactory: Send + Sync {
    fn create(&self, secrets: &Secrets, installation_id: Option<u64>)
    -> Result<Arc<dyn GitHubApi>>;
}

pub struct OctocrabFactory {
    pub mode: AuthMode,
}

impl ClientFactory for OctocrabFactory {
    fn create(
        &self,
        secrets: &Secrets,
        installation_id: Option<u64>,
    ) -> Result<Arc<dyn GitHubApi>> {
        let client = match self.mode {
            AuthMode::Token => {
                let token = secrets.token.clone().context("No token configured")?;
                Octocrab::builder()
                    .personal_token(token)
                    .build()
                    .context("Failed to create GitHub client")?
            }
            AuthMode::App => {
                let installation_id = installation_id.context("No installation ID")?;
                let app_id = secrets.app_id.context("No app_id configured")?;
                let private_key =
                    secrets.private_key.as_deref().context("No private_key configured")?;
                let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key.as_bytes())
                    .context("Invalid private_key")?;
                let app_client = Octocrab::builder()
                    .app(app_id.into(), key)
                    .build()
                    .context("Failed to create GitHub client")?;
                app_client
                    .installation(InstallationId(installation_id))
                    .context("Failed to create installation client")?
            }
        };
        Ok(Arc::new(OctocrabApi::new(client)))
    }
}

/// Authenticated clients keyed by installation id.
///
/// Concurrent first requests for the same installation share a single
/// `ClientFactory::create` call; later requests reuse the stored client.
pub struct ClientCache {
    clients: Cache<u64, Arc<dyn GitHubApi>>,
    factory: Arc<dyn ClientFactory>,
}

impl ClientCache {
    pub fn new(factory: Arc<dyn ClientFactory>, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().eviction_listener(|k: Arc<u64>, _v, cause| {
            tracing::info!("Evicting client for installation {}: {:?}", k, cause);
        });
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self { clients: builder.build(), factory }
    }

    pub async fn client_for(
        &self,
        secrets: &Secrets,
        installation_id: Option<u64>,
    ) -> Result<Arc<dyn GitHubApi>> {
        let key = installation_id.unwrap_or(TOKEN_CLIENT_KEY);
        self.clients
            .try_get_with(key, async {
                tracing::info!("Creating client for installation {}", key);
                self.factory.create(secrets, installation_id)
            })
            .await
            .map_err(|e| anyhow!("{e:#}"))
    }

    pub async fn len(&self) -> u64 {
        self.clients.run_pending_tasks().await;
        self.clients.entry_count()
    }
}
