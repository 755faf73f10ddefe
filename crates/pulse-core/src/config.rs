//! Configuration types for pulse components.
//!
//! Every struct has hardcoded defaults and a `from_env()` constructor that
//! overrides individual values from environment variables. Tenant
//! definitions come from a TOML file (`tenants.toml`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Reads an environment variable and parses it, falling back to `default`
/// when the variable is missing or malformed.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Database connection pool configuration.
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

impl DbConfig {
    /// Reads `DB_MAX_CONNECTIONS`.
    pub fn from_env() -> Self {
        Self {
            max_connections: env_or("DB_MAX_CONNECTIONS", 5),
        }
    }
}

/// HTTP client configuration for external API calls.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("pulse/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Reads `HTTP_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            timeout: Duration::from_secs(env_or(
                "HTTP_TIMEOUT_SECS",
                default.timeout.as_secs(),
            )),
            ..default
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Per-run sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Records requested per fetch.
    pub page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

impl SyncConfig {
    /// Reads `SYNC_PAGE_SIZE`.
    ///
    /// The worker pool has no setting of its own: it is sized from the
    /// source pipeline's bulkhead (`SYNC_POOL_SIZE`).
    pub fn from_env() -> Self {
        Self::default().with_page_size(env_or("SYNC_PAGE_SIZE", 100))
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// Recurring schedule for each source.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub jira_enabled: bool,
    pub jira_interval: Duration,
    pub github_enabled: bool,
    pub github_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            jira_enabled: true,
            jira_interval: Duration::from_secs(30 * 60),
            github_enabled: true,
            github_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl ScheduleConfig {
    /// Reads `SYNC_JIRA_ENABLED`, `SYNC_JIRA_INTERVAL_SECS`,
    /// `SYNC_GITHUB_ENABLED` and `SYNC_GITHUB_INTERVAL_SECS`.
    pub fn from_env() -> Self {
        Self {
            jira_enabled: env_or("SYNC_JIRA_ENABLED", true),
            jira_interval: Duration::from_secs(env_or("SYNC_JIRA_INTERVAL_SECS", 30 * 60)),
            github_enabled: env_or("SYNC_GITHUB_ENABLED", true),
            github_interval: Duration::from_secs(env_or("SYNC_GITHUB_INTERVAL_SECS", 15 * 60)),
        }
    }
}

// =============================================================================
// Tenant Configuration (tenants.toml)
// =============================================================================

fn default_enabled() -> bool {
    true
}

/// Root configuration structure for tenants.toml.
///
/// # Example
///
/// ```toml
/// [[tenants]]
/// id = 1
/// name = "acme"
///
/// [tenants.jira]
/// host_url = "https://acme.atlassian.net"
/// project_key = "ACME"
/// token_env = "ACME_JIRA_TOKEN"
///
/// [tenants.github]
/// repo_url = "https://github.com/acme/api"
/// token_env = "ACME_GITHUB_TOKEN"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantsConfig {
    #[serde(default)]
    pub tenants: Vec<TenantEntry>,
}

impl TenantsConfig {
    /// Returns tenants with `enabled = true`.
    pub fn enabled_tenants(&self) -> Vec<&TenantEntry> {
        self.tenants.iter().filter(|t| t.enabled).collect()
    }

    pub fn find(&self, id: i64) -> Option<&TenantEntry> {
        self.tenants.iter().find(|t| t.id == id)
    }

    /// Parses a TOML document and rejects duplicate tenant ids.
    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let config: TenantsConfig = toml::from_str(content)
            .map_err(|e| AppError::ConfigError(format!("Invalid TOML: {}", e)))?;

        let mut seen = std::collections::HashSet::new();
        for tenant in &config.tenants {
            if !seen.insert(tenant.id) {
                return Err(AppError::ConfigError(format!(
                    "Duplicate tenant id {} in tenants file",
                    tenant.id
                )));
            }
        }

        Ok(config)
    }
}

/// A single tenant entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantEntry {
    pub id: i64,

    /// Optional display name, used only in logs.
    pub name: Option<String>,

    /// Disabled tenants are not eligible for scheduled syncs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub jira: Option<JiraTenantEntry>,

    pub github: Option<GithubTenantEntry>,
}

/// Jira connection for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraTenantEntry {
    /// Jira Cloud host, e.g. `https://acme.atlassian.net`.
    pub host_url: String,
    pub project_key: String,
    /// Name of the environment variable holding the API token.
    pub token_env: String,
}

/// GitHub connection for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubTenantEntry {
    /// Repository URL, e.g. `https://github.com/acme/api`.
    pub repo_url: String,
    /// Name of the environment variable holding the access token.
    pub token_env: String,
}

/// Default configuration file name.
pub const TENANTS_FILE_NAME: &str = "tenants.toml";

/// Returns the default tenants file path: `~/.config/pulse/tenants.toml`.
pub fn default_tenants_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pulse").join(TENANTS_FILE_NAME))
}

/// Load tenant configuration from a TOML file.
///
/// Uses [`default_tenants_path`] when `path` is `None`. A missing file is an
/// error: without tenants there is nothing to sync.
pub fn load_tenants_config(path: Option<&Path>) -> Result<TenantsConfig, AppError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_tenants_path().ok_or_else(|| {
            AppError::ConfigError("Cannot determine config directory".to_string())
        })?,
    };

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read tenants file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    TenantsConfig::from_toml_str(&content).map_err(|e| match e {
        AppError::ConfigError(msg) => {
            AppError::ConfigError(format!("{} ({})", msg, config_path.display()))
        }
        other => other,
    })
}
