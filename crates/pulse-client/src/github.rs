//! GitHub REST client for fetching a repository's recent commits.
//!
//! API reference: <https://docs.github.com/en/rest/commits/commits#list-commits>

use pulse_core::HttpConfig;
use pulse_core::error::AppError;
use pulse_core::job::JobType;
use pulse_core::models::{ActivitySource, ExternalRecord, GithubCommitRecord, SourceTarget};
use pulse_core::traits::SourceClient;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::http::{build_client, check_status, send_error};

/// Public GitHub API endpoint.
pub const GITHUB_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";

#[derive(Deserialize, Debug)]
struct CommitDto {
    sha: String,
    commit: CommitDetail,
    author: Option<AccountDto>,
    /// Only present on the single-commit endpoint.
    stats: Option<StatsDto>,
    files: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize, Debug)]
struct CommitDetail {
    message: Option<String>,
    author: Option<SignatureDto>,
}

#[derive(Deserialize, Debug)]
struct SignatureDto {
    name: Option<String>,
    email: Option<String>,
    date: Option<String>,
}

#[derive(Deserialize, Debug)]
struct AccountDto {
    login: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StatsDto {
    additions: Option<i32>,
    deletions: Option<i32>,
    total: Option<i32>,
}

impl From<CommitDto> for GithubCommitRecord {
    fn from(dto: CommitDto) -> Self {
        let signature = dto.commit.author;
        Self {
            sha: dto.sha,
            message: dto.commit.message,
            author_name: signature.as_ref().and_then(|s| s.name.clone()),
            author_email: signature.as_ref().and_then(|s| s.email.clone()),
            author_date: signature.and_then(|s| s.date),
            author_login: dto.author.and_then(|a| a.login),
            additions: dto.stats.as_ref().and_then(|s| s.additions),
            deletions: dto.stats.as_ref().and_then(|s| s.deletions),
            total: dto.stats.as_ref().and_then(|s| s.total),
            files_changed: dto.files.map(|f| f.len() as i32),
        }
    }
}

/// Splits `https://github.com/owner/repo(.git)` into `(owner, repo)`.
///
/// # Examples
///
/// ```
/// use pulse_client::github::parse_repo_url;
///
/// let (owner, repo) = parse_repo_url("https://github.com/acme/api.git").unwrap();
/// assert_eq!(owner, "acme");
/// assert_eq!(repo, "api");
/// ```
pub fn parse_repo_url(repo_url: &str) -> Result<(String, String), AppError> {
    let url = Url::parse(repo_url).map_err(|_| AppError::InvalidUrl(repo_url.to_string()))?;
    let mut segments = url
        .path_segments()
        .ok_or_else(|| AppError::InvalidUrl(repo_url.to_string()))?
        .filter(|s| !s.is_empty());

    match (segments.next(), segments.next(), segments.next()) {
        (Some(owner), Some(repo), None) => {
            let repo = repo.strip_suffix(".git").unwrap_or(repo);
            if repo.is_empty() {
                return Err(AppError::InvalidUrl(repo_url.to_string()));
            }
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(AppError::InvalidUrl(format!(
            "{} (expected https://github.com/owner/repo)",
            repo_url
        ))),
    }
}

/// HTTP client for the GitHub REST API.
///
/// # Examples
///
/// ```no_run
/// use pulse_client::GithubClient;
/// use pulse_core::HttpConfig;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = GithubClient::new(HttpConfig::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    config: HttpConfig,
    api_base: Url,
}

impl GithubClient {
    pub fn new(config: HttpConfig) -> Result<Self, AppError> {
        Self::with_api_base(config, GITHUB_API_URL)
    }

    /// Points the client at another API root, e.g. GitHub Enterprise.
    pub fn with_api_base(config: HttpConfig, api_base: &str) -> Result<Self, AppError> {
        let api_base =
            Url::parse(api_base).map_err(|_| AppError::InvalidUrl(api_base.to_string()))?;
        Ok(Self {
            client: build_client(&config)?,
            config,
            api_base,
        })
    }

    fn commits_url(&self, owner: &str, repo: &str, page_size: usize) -> Result<Url, AppError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::InvalidUrl(self.api_base.to_string()))?
            .pop_if_empty()
            .extend(["repos", owner, repo, "commits"]);
        url.query_pairs_mut()
            .append_pair("per_page", &page_size.min(100).to_string());
        Ok(url)
    }

    /// Fetches the latest commits of the target repository.
    pub async fn list_commits(
        &self,
        target: &SourceTarget,
        page_size: usize,
    ) -> Result<Vec<GithubCommitRecord>, AppError> {
        let (owner, repo) = parse_repo_url(&target.host_url)?;
        let url = self.commits_url(&owner, &repo, page_size)?;

        let resp = self
            .client
            .get(url)
            .bearer_auth(&target.api_token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| send_error(e, &self.config))?;

        let resp = check_quota(resp)?;
        let resp = check_status(resp).await?;
        let commits: Vec<CommitDto> = resp
            .json()
            .await
            .map_err(|e| send_error(e, &self.config))?;

        debug!(repo = %target.identifier, returned = commits.len(), "GitHub commits listed");
        Ok(commits.into_iter().map(Into::into).collect())
    }
}

/// GitHub answers an exhausted quota with 403 rather than 429.
fn check_quota(resp: Response) -> Result<Response, AppError> {
    let remaining = resp
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    match (resp.status(), remaining) {
        (StatusCode::FORBIDDEN, Some(0)) | (StatusCode::TOO_MANY_REQUESTS, _) => {
            warn!(status = %resp.status(), "GitHub rate limit exhausted");
            Err(AppError::RateLimitExceeded)
        }
        _ => Ok(resp),
    }
}

impl SourceClient for GithubClient {
    fn source(&self) -> ActivitySource {
        ActivitySource::Github
    }

    fn job_type(&self) -> JobType {
        JobType::GithubCommits
    }

    async fn fetch(
        &self,
        target: &SourceTarget,
        page_size: usize,
    ) -> Result<Vec<ExternalRecord>, AppError> {
        let commits = self.list_commits(target, page_size).await?;
        Ok(commits.into_iter().map(ExternalRecord::GithubCommit).collect())
    }

    fn describe_target(&self, target: &SourceTarget) -> String {
        format!("repo={}", target.identifier)
    }
}
