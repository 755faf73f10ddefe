//! Mapping of external records into persisted entities.
//!
//! Mapping never fails. A timestamp that is missing or cannot be parsed is
//! replaced by the current time, logged with the field, the record key and
//! the raw value, and counted as a parser warning.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::metrics::SyncMetrics;
use crate::models::{
    ActivitySource, ActivityType, ExternalRecord, GithubCommit, GithubCommitRecord, JiraIssue,
    JiraIssueRecord, MappedBatch, MappedRecord, SourceEntity, UnifiedActivity,
};

/// Parses the timestamp formats sent by Jira and GitHub.
///
/// Accepted:
/// - RFC 3339: `2024-01-15T10:30:00Z`, `2024-01-15T10:30:00.123+07:00`
/// - Jira compact offset: `2024-01-15T10:30:00.000+0000`
/// - No offset at all, taken as UTC: `2024-01-15T10:30:00`
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Maps Jira issue types onto activity types.
pub fn activity_type_for_issue(issue_type: Option<&str>) -> ActivityType {
    match issue_type.map(str::to_lowercase).as_deref() {
        None => ActivityType::Task,
        Some("bug") => ActivityType::Bug,
        Some("story") => ActivityType::Story,
        Some("task") => ActivityType::Task,
        Some(_) => ActivityType::Issue,
    }
}

/// Stateless mapper that reports parse problems to a metrics sink.
#[derive(Clone)]
pub struct DataMapper {
    metrics: Arc<dyn SyncMetrics>,
}

impl DataMapper {
    pub fn new(metrics: Arc<dyn SyncMetrics>) -> Self {
        Self { metrics }
    }

    /// Maps a whole fetch result, split by destination table.
    pub fn map_all(&self, tenant_id: i64, records: &[ExternalRecord]) -> MappedBatch {
        records.iter().map(|r| self.map(tenant_id, r)).collect()
    }

    pub fn map(&self, tenant_id: i64, record: &ExternalRecord) -> MappedRecord {
        self.metrics.record_parsed(record.source());
        match record {
            ExternalRecord::JiraIssue(issue) => self.map_jira_issue(tenant_id, issue),
            ExternalRecord::GithubCommit(commit) => self.map_github_commit(tenant_id, commit),
        }
    }

    fn map_jira_issue(&self, tenant_id: i64, r: &JiraIssueRecord) -> MappedRecord {
        let created_at = self.timestamp_or_now(
            ActivitySource::Jira,
            "created_at",
            &r.key,
            r.created.as_deref(),
        );
        let updated_at = self.timestamp_or_now(
            ActivitySource::Jira,
            "updated_at",
            &r.key,
            r.updated.as_deref(),
        );

        let (assignee_email, assignee_name) = split_user(r.assignee.as_ref());
        let (reporter_email, reporter_name) = split_user(r.reporter.as_ref());

        let activity = UnifiedActivity {
            tenant_id,
            source: ActivitySource::Jira,
            activity_type: activity_type_for_issue(r.issue_type.as_deref()),
            external_id: r.key.clone(),
            title: r.summary.clone(),
            description: r.description.clone(),
            author_email: reporter_email.clone(),
            author_name: reporter_name.clone(),
            status: r.status.clone(),
            created_at,
            updated_at,
        };

        let issue = JiraIssue {
            tenant_id,
            issue_key: r.key.clone(),
            issue_id: r.id.clone(),
            summary: r.summary.clone(),
            description: r.description.clone(),
            issue_type: r.issue_type.clone(),
            status: r.status.clone(),
            priority: r.priority.clone(),
            assignee_email,
            assignee_name,
            reporter_email,
            reporter_name,
            created_at,
            updated_at,
        };

        MappedRecord {
            activity,
            entity: SourceEntity::Issue(issue),
        }
    }

    fn map_github_commit(&self, tenant_id: i64, r: &GithubCommitRecord) -> MappedRecord {
        // Commits are immutable: the author date is creation and update time.
        let committed = self.timestamp_or_now(
            ActivitySource::Github,
            "committed_date",
            &r.sha,
            r.author_date.as_deref(),
        );

        let title = r
            .message
            .as_deref()
            .and_then(|m| m.lines().next())
            .map(str::to_string);

        let description = match (r.additions, r.deletions) {
            (None, None) => None,
            (a, d) => Some(format!("+{} -{} lines", a.unwrap_or(0), d.unwrap_or(0))),
        };

        let activity = UnifiedActivity {
            tenant_id,
            source: ActivitySource::Github,
            activity_type: ActivityType::Commit,
            external_id: r.sha.clone(),
            title,
            description,
            author_email: r.author_email.clone(),
            author_name: r.author_name.clone(),
            status: Some("committed".to_string()),
            created_at: committed,
            updated_at: committed,
        };

        let commit = GithubCommit {
            tenant_id,
            commit_sha: r.sha.clone(),
            message: r.message.clone(),
            author_name: r.author_name.clone(),
            author_email: r.author_email.clone(),
            author_login: r.author_login.clone(),
            committed_date: committed,
            additions: r.additions.unwrap_or(0),
            deletions: r.deletions.unwrap_or(0),
            total_changes: r.total.unwrap_or(0),
            files_changed: r.files_changed.unwrap_or(0),
            created_at: committed,
            updated_at: committed,
        };

        MappedRecord {
            activity,
            entity: SourceEntity::Commit(commit),
        }
    }

    fn timestamp_or_now(
        &self,
        source: ActivitySource,
        field: &'static str,
        record_key: &str,
        raw: Option<&str>,
    ) -> DateTime<Utc> {
        if let Some(parsed) = raw.and_then(parse_timestamp) {
            return parsed;
        }

        tracing::warn!(
            source = %source,
            field,
            record_key,
            raw = raw.unwrap_or("<missing>"),
            "Failed to parse timestamp, falling back to current time"
        );
        self.metrics.parser_warning(source, field);
        Utc::now()
    }
}

fn split_user(user: Option<&crate::models::ExternalUser>) -> (Option<String>, Option<String>) {
    match user {
        Some(u) => (u.email.clone(), u.name.clone()),
        None => (None, None),
    }
}
