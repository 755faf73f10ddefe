//! Domain models shared across the workspace.
//!
//! Three layers of types live here:
//!
//! - **External records** ([`ExternalRecord`]): what a source client returns.
//!   In-memory only, timestamps still raw strings.
//! - **Persisted entities** ([`UnifiedActivity`], [`JiraIssue`], [`GithubCommit`]):
//!   what the store upserts, keyed by natural identity.
//! - **Tenant configuration** ([`TenantConfig`], [`SourceTarget`]): what the
//!   configuration provider hands back for one tenant.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// =============================================================================
// Sources and activity types
// =============================================================================

/// External system an activity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivitySource {
    Jira,
    Github,
}

impl ActivitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivitySource::Jira => "JIRA",
            ActivitySource::Github => "GITHUB",
        }
    }

    /// Human-readable name used in log lines and fallback reasons.
    pub fn display_name(&self) -> &'static str {
        match self {
            ActivitySource::Jira => "Jira",
            ActivitySource::Github => "GitHub",
        }
    }
}

impl fmt::Display for ActivitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivitySource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "JIRA" => Ok(Self::Jira),
            "GITHUB" => Ok(Self::Github),
            _ => Err(AppError::ConfigError(format!(
                "Unknown activity source: '{}'. Valid options: jira, github",
                s
            ))),
        }
    }
}

/// Normalized kind of a unified activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    Task,
    Issue,
    Bug,
    Story,
    Commit,
    PullRequest,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Task => "TASK",
            ActivityType::Issue => "ISSUE",
            ActivityType::Bug => "BUG",
            ActivityType::Story => "STORY",
            ActivityType::Commit => "COMMIT",
            ActivityType::PullRequest => "PULL_REQUEST",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TASK" => Ok(Self::Task),
            "ISSUE" => Ok(Self::Issue),
            "BUG" => Ok(Self::Bug),
            "STORY" => Ok(Self::Story),
            "COMMIT" => Ok(Self::Commit),
            "PULL_REQUEST" => Ok(Self::PullRequest),
            _ => Err(AppError::Generic(format!("invalid activity type: {}", s))),
        }
    }
}

// =============================================================================
// External records
// =============================================================================

/// A person as reported by an external API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalUser {
    pub email: Option<String>,
    pub name: Option<String>,
}

/// A Jira issue as fetched, before mapping.
#[derive(Debug, Clone, Default)]
pub struct JiraIssueRecord {
    /// Numeric Jira id (as a string, the API sends it that way).
    pub id: String,
    /// Issue key, e.g. `PROJ-42`. Natural key of the issue.
    pub key: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub issue_type: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assignee: Option<ExternalUser>,
    pub reporter: Option<ExternalUser>,
    pub created: Option<String>,
    pub updated: Option<String>,
}

/// A GitHub commit as fetched, before mapping.
#[derive(Debug, Clone, Default)]
pub struct GithubCommitRecord {
    /// Full commit SHA. Natural key of the commit.
    pub sha: String,
    pub message: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    /// Author timestamp as sent by the API.
    pub author_date: Option<String>,
    pub author_login: Option<String>,
    pub additions: Option<i32>,
    pub deletions: Option<i32>,
    pub total: Option<i32>,
    pub files_changed: Option<i32>,
}

/// Source-specific record returned by a [`crate::traits::SourceClient`].
#[derive(Debug, Clone)]
pub enum ExternalRecord {
    JiraIssue(JiraIssueRecord),
    GithubCommit(GithubCommitRecord),
}

impl ExternalRecord {
    pub fn source(&self) -> ActivitySource {
        match self {
            ExternalRecord::JiraIssue(_) => ActivitySource::Jira,
            ExternalRecord::GithubCommit(_) => ActivitySource::Github,
        }
    }

    /// Natural key of the record inside its source.
    pub fn natural_key(&self) -> &str {
        match self {
            ExternalRecord::JiraIssue(r) => &r.key,
            ExternalRecord::GithubCommit(r) => &r.sha,
        }
    }
}

// =============================================================================
// Persisted entities
// =============================================================================

/// Normalized cross-source activity.
///
/// Unique on `(tenant_id, source, external_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedActivity {
    pub tenant_id: i64,
    pub source: ActivitySource,
    pub activity_type: ActivityType,
    pub external_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub author_email: Option<String>,
    pub author_name: Option<String>,
    pub status: Option<String>,
    /// Creation time in the source system.
    pub created_at: DateTime<Utc>,
    /// Last modification time in the source system.
    pub updated_at: DateTime<Utc>,
}

/// Denormalized Jira issue.
///
/// Unique on `(tenant_id, issue_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraIssue {
    pub tenant_id: i64,
    pub issue_key: String,
    pub issue_id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub issue_type: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assignee_email: Option<String>,
    pub assignee_name: Option<String>,
    pub reporter_email: Option<String>,
    pub reporter_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Denormalized GitHub commit.
///
/// Unique on `(tenant_id, commit_sha)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubCommit {
    pub tenant_id: i64,
    pub commit_sha: String,
    pub message: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub author_login: Option<String>,
    pub committed_date: DateTime<Utc>,
    pub additions: i32,
    pub deletions: i32,
    pub total_changes: i32,
    pub files_changed: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Source-specific entity produced alongside a [`UnifiedActivity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEntity {
    Issue(JiraIssue),
    Commit(GithubCommit),
}

/// Output of mapping one external record.
#[derive(Debug, Clone)]
pub struct MappedRecord {
    pub activity: UnifiedActivity,
    pub entity: SourceEntity,
}

/// Mapped records split by table, ready for batch upserts.
#[derive(Debug, Default, Clone)]
pub struct MappedBatch {
    pub activities: Vec<UnifiedActivity>,
    pub issues: Vec<JiraIssue>,
    pub commits: Vec<GithubCommit>,
}

impl MappedBatch {
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

impl FromIterator<MappedRecord> for MappedBatch {
    fn from_iter<I: IntoIterator<Item = MappedRecord>>(iter: I) -> Self {
        let mut batch = MappedBatch::default();
        for record in iter {
            batch.activities.push(record.activity);
            match record.entity {
                SourceEntity::Issue(issue) => batch.issues.push(issue),
                SourceEntity::Commit(commit) => batch.commits.push(commit),
            }
        }
        batch
    }
}

// =============================================================================
// Tenant configuration
// =============================================================================

/// Where and how to reach one external source for one tenant.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceTarget {
    /// Jira host URL or GitHub repository URL.
    pub host_url: String,
    /// Decrypted API token.
    pub api_token: String,
    /// Jira project key, or `owner/repo` for GitHub.
    pub identifier: String,
}

// Tokens must never end up in logs.
impl fmt::Debug for SourceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceTarget")
            .field("host_url", &self.host_url)
            .field("api_token", &"<redacted>")
            .field("identifier", &self.identifier)
            .finish()
    }
}

/// Decrypted configuration for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantConfig {
    pub tenant_id: i64,
    pub jira: Option<SourceTarget>,
    pub github: Option<SourceTarget>,
}

impl TenantConfig {
    /// Returns the target for the given source, if configured.
    pub fn target_for(&self, source: ActivitySource) -> Option<&SourceTarget> {
        match source {
            ActivitySource::Jira => self.jira.as_ref(),
            ActivitySource::Github => self.github.as_ref(),
        }
    }
}
