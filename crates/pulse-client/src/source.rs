//! Source client enum dispatch.
//!
//! [`SourceClient`] uses `impl Future` return types (RPITIT), which makes it
//! not object-safe. An enum gives callers one concrete type to pick a source
//! at runtime.

use pulse_core::HttpConfig;
use pulse_core::error::AppError;
use pulse_core::job::JobType;
use pulse_core::models::{ActivitySource, ExternalRecord, SourceTarget};
use pulse_core::traits::SourceClient;

use crate::github::GithubClient;
use crate::jira::JiraClient;

/// Unified source client that wraps concrete client implementations.
#[derive(Clone)]
pub enum SourceClientEnum {
    Jira(JiraClient),
    Github(GithubClient),
}

impl SourceClientEnum {
    /// Builds the default client for `source`.
    pub fn for_source(source: ActivitySource, config: HttpConfig) -> Result<Self, AppError> {
        match source {
            ActivitySource::Jira => Ok(Self::Jira(JiraClient::new(config)?)),
            ActivitySource::Github => Ok(Self::Github(GithubClient::new(config)?)),
        }
    }
}

impl SourceClient for SourceClientEnum {
    fn source(&self) -> ActivitySource {
        match self {
            Self::Jira(c) => c.source(),
            Self::Github(c) => c.source(),
        }
    }

    fn job_type(&self) -> JobType {
        match self {
            Self::Jira(c) => c.job_type(),
            Self::Github(c) => c.job_type(),
        }
    }

    async fn fetch(
        &self,
        target: &SourceTarget,
        page_size: usize,
    ) -> Result<Vec<ExternalRecord>, AppError> {
        match self {
            Self::Jira(c) => c.fetch(target, page_size).await,
            Self::Github(c) => c.fetch(target, page_size).await,
        }
    }

    fn describe_target(&self, target: &SourceTarget) -> String {
        match self {
            Self::Jira(c) => c.describe_target(target),
            Self::Github(c) => c.describe_target(target),
        }
    }
}
