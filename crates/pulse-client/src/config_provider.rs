//! File-backed tenant configuration.
//!
//! Tenants come from `tenants.toml`; API tokens never live in the file,
//! only the name of the environment variable holding each one.

use std::path::Path;
use std::sync::Arc;

use pulse_core::config::{TenantEntry, TenantsConfig, load_tenants_config};
use pulse_core::error::AppError;
use pulse_core::models::{SourceTarget, TenantConfig};
use pulse_core::traits::ConfigProvider;
use tracing::warn;

use crate::github::parse_repo_url;

type TokenLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// [`ConfigProvider`] over a parsed tenants file.
#[derive(Clone)]
pub struct FileConfigProvider {
    config: Arc<TenantsConfig>,
    tokens: TokenLookup,
}

impl FileConfigProvider {
    /// Tokens are read from the process environment.
    pub fn new(config: TenantsConfig) -> Self {
        Self {
            config: Arc::new(config),
            tokens: Arc::new(|name: &str| std::env::var(name).ok().filter(|v| !v.is_empty())),
        }
    }

    /// Loads the tenants file at `path`, or the default location.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        Ok(Self::new(load_tenants_config(path)?))
    }

    /// Replaces the environment lookup for tokens.
    pub fn with_token_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.tokens = Arc::new(lookup);
        self
    }

    pub fn tenants(&self) -> &TenantsConfig {
        &self.config
    }

    fn token(&self, tenant_id: i64, source: &str, env_name: &str) -> Option<String> {
        let token = (self.tokens)(env_name);
        if token.is_none() {
            warn!(
                tenant_id,
                source,
                token_env = env_name,
                "Token environment variable is not set, source disabled for tenant"
            );
        }
        token
    }

    fn resolve(&self, entry: &TenantEntry) -> TenantConfig {
        let jira = entry.jira.as_ref().and_then(|j| {
            let api_token = self.token(entry.id, "jira", &j.token_env)?;
            Some(SourceTarget {
                host_url: j.host_url.clone(),
                api_token,
                identifier: j.project_key.clone(),
            })
        });

        let github = entry.github.as_ref().and_then(|g| {
            let (owner, repo) = match parse_repo_url(&g.repo_url) {
                Ok(parts) => parts,
                Err(e) => {
                    warn!(tenant_id = entry.id, error = %e, "Invalid GitHub repository URL");
                    return None;
                }
            };
            let api_token = self.token(entry.id, "github", &g.token_env)?;
            Some(SourceTarget {
                host_url: g.repo_url.clone(),
                api_token,
                identifier: format!("{}/{}", owner, repo),
            })
        });

        TenantConfig {
            tenant_id: entry.id,
            jira,
            github,
        }
    }
}

impl ConfigProvider for FileConfigProvider {
    async fn list_eligible_tenant_ids(&self) -> Result<Vec<i64>, AppError> {
        let mut ids: Vec<i64> = self
            .config
            .enabled_tenants()
            .into_iter()
            .map(|t| t.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn get_decrypted_config(&self, tenant_id: i64) -> Result<TenantConfig, AppError> {
        let entry = self
            .config
            .find(tenant_id)
            .ok_or(AppError::ConfigNotFound(tenant_id))?;
        Ok(self.resolve(entry))
    }
}
