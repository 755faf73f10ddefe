//! Jira Cloud client for fetching a project's issues.
//!
//! Uses the REST v3 search endpoint with Basic authentication. The tenant's
//! token is the `email:api_token` pair Jira Cloud expects.
//!
//! API reference: <https://developer.atlassian.com/cloud/jira/platform/rest/v3/api-group-issue-search/>

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pulse_core::HttpConfig;
use pulse_core::error::AppError;
use pulse_core::job::JobType;
use pulse_core::models::{
    ActivitySource, ExternalRecord, ExternalUser, JiraIssueRecord, SourceTarget,
};
use pulse_core::traits::SourceClient;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::http::{build_client, check_status, send_error};

/// Issue fields requested from the search endpoint.
const SEARCH_FIELDS: &str =
    "summary,description,issuetype,status,assignee,reporter,priority,created,updated";

/// Response of `GET /rest/api/3/search`.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    issues: Vec<JiraIssueDto>,
}

#[derive(Deserialize, Debug)]
struct JiraIssueDto {
    id: String,
    key: String,
    #[serde(default)]
    fields: JiraFields,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct JiraFields {
    summary: Option<String>,
    /// Plain string on older instances, an Atlassian Document on v3.
    description: Option<Value>,
    #[serde(rename = "issuetype")]
    issue_type: Option<Named>,
    status: Option<Named>,
    priority: Option<Named>,
    assignee: Option<JiraUser>,
    reporter: Option<JiraUser>,
    created: Option<String>,
    updated: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Named {
    name: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct JiraUser {
    email_address: Option<String>,
    display_name: Option<String>,
}

impl From<JiraUser> for ExternalUser {
    fn from(user: JiraUser) -> Self {
        Self {
            email: user.email_address,
            name: user.display_name,
        }
    }
}

impl From<JiraIssueDto> for JiraIssueRecord {
    fn from(dto: JiraIssueDto) -> Self {
        let f = dto.fields;
        Self {
            id: dto.id,
            key: dto.key,
            summary: f.summary,
            description: f.description.as_ref().and_then(description_text),
            issue_type: f.issue_type.and_then(|n| n.name),
            status: f.status.and_then(|n| n.name),
            priority: f.priority.and_then(|n| n.name),
            assignee: f.assignee.map(Into::into),
            reporter: f.reporter.map(Into::into),
            created: f.created,
            updated: f.updated,
        }
    }
}

/// Flattens a description to plain text.
///
/// Atlassian Document Format nests text nodes under `content`; paragraphs
/// are joined with newlines.
fn description_text(value: &Value) -> Option<String> {
    fn collect(node: &Value, out: &mut String) {
        if let Some(text) = node.get("text").and_then(Value::as_str) {
            out.push_str(text);
        }
        if let Some(children) = node.get("content").and_then(Value::as_array) {
            for child in children {
                collect(child, out);
            }
            if node.get("type").and_then(Value::as_str) == Some("paragraph") {
                out.push('\n');
            }
        }
    }

    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => {
            let mut out = String::new();
            collect(value, &mut out);
            let text = out.trim_end().to_string();
            if text.is_empty() { None } else { Some(text) }
        }
        _ => None,
    }
}

/// HTTP client for Jira Cloud.
///
/// The host comes from each [`SourceTarget`], so one client serves every
/// tenant.
///
/// # Examples
///
/// ```no_run
/// use pulse_client::JiraClient;
/// use pulse_core::HttpConfig;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = JiraClient::new(HttpConfig::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct JiraClient {
    client: Client,
    config: HttpConfig,
}

impl JiraClient {
    pub fn new(config: HttpConfig) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }

    /// Builds the search URL for `project_key`.
    fn search_url(host_url: &str, project_key: &str, page_size: usize) -> Result<Url, AppError> {
        let base = Url::parse(host_url).map_err(|_| AppError::InvalidUrl(host_url.to_string()))?;
        let mut url = base
            .join("rest/api/3/search")
            .map_err(|e| AppError::InvalidUrl(e.to_string()))?;

        url.query_pairs_mut()
            .append_pair("jql", &format!("project = {} ORDER BY updated DESC", project_key))
            .append_pair("maxResults", &page_size.to_string())
            .append_pair("fields", SEARCH_FIELDS);

        Ok(url)
    }

    /// Fetches the most recently updated issues of the target project.
    pub async fn search_issues(
        &self,
        target: &SourceTarget,
        page_size: usize,
    ) -> Result<Vec<JiraIssueRecord>, AppError> {
        let url = Self::search_url(&target.host_url, &target.identifier, page_size)?;
        let auth = format!("Basic {}", STANDARD.encode(target.api_token.as_bytes()));

        let resp = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| send_error(e, &self.config))?;

        let resp = check_status(resp).await?;
        let search: SearchResponse = resp
            .json()
            .await
            .map_err(|e| send_error(e, &self.config))?;

        debug!(
            project = %target.identifier,
            total = search.total,
            returned = search.issues.len(),
            "Jira search completed"
        );

        Ok(search.issues.into_iter().map(Into::into).collect())
    }
}

impl SourceClient for JiraClient {
    fn source(&self) -> ActivitySource {
        ActivitySource::Jira
    }

    fn job_type(&self) -> JobType {
        JobType::JiraIssues
    }

    async fn fetch(
        &self,
        target: &SourceTarget,
        page_size: usize,
    ) -> Result<Vec<ExternalRecord>, AppError> {
        let issues = self.search_issues(target, page_size).await?;
        Ok(issues.into_iter().map(ExternalRecord::JiraIssue).collect())
    }

    fn describe_target(&self, target: &SourceTarget) -> String {
        format!("project={}, host={}", target.identifier, target.host_url)
    }
}
