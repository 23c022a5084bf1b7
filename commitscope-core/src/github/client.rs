//! HTTP client for the GitHub GraphQL commit-history API
//!
//! Walks `repository.defaultBranchRef.target.history` with cursor-based
//! pagination, filtered server-side by `since`/`until`. Rate-limit
//! bookkeeping is shared through [`RateLimitGate`] so every in-flight
//! fetch backs off together when the API budget runs out.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;

use crate::config::GitHubConfig;
use crate::error::{Error, Result};
use crate::types::{Commit, DateRange, RepoId};

use super::{CommitPage, CommitSource};

/// GraphQL query for one page of commit history.
///
/// The `rateLimit` block rides along on every request so the gate can be
/// updated without extra calls.
const COMMIT_HISTORY_QUERY: &str = r#"
query CommitHistory($owner: String!, $name: String!, $pageSize: Int!, $after: String, $since: GitTimestamp!, $until: GitTimestamp!) {
  repository(owner: $owner, name: $name) {
    defaultBranchRef {
      target {
        ... on Commit {
          history(first: $pageSize, after: $after, since: $since, until: $until) {
            pageInfo {
              hasNextPage
              endCursor
            }
            nodes {
              oid
              message
              author {
                name
                email
                date
              }
              additions
              deletions
              parents(first: 2) {
                totalCount
              }
            }
          }
        }
      }
    }
  }
  rateLimit {
    remaining
    resetAt
  }
}
"#;

/// Shared rate-limit state visible to all fetch attempts.
///
/// When any request observes a rate-limit response (or sees the remaining
/// budget hit zero), it parks the gate until the reset instant; every
/// other fetch waits on the same gate before issuing its next request.
#[derive(Default)]
pub struct RateLimitGate {
    blocked_until: Mutex<Option<Instant>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block all requests for the given duration.
    pub fn block_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut guard = self.blocked_until.lock().unwrap();
        match *guard {
            Some(existing) if existing >= until => {}
            _ => *guard = Some(until),
        }
    }

    /// Remaining wait, if the gate is currently blocked.
    pub fn remaining_wait(&self) -> Option<Duration> {
        let mut guard = self.blocked_until.lock().unwrap();
        match *guard {
            Some(until) => {
                let now = Instant::now();
                if until > now {
                    Some(until - now)
                } else {
                    *guard = None;
                    None
                }
            }
            None => None,
        }
    }

    /// Wait until the gate opens.
    pub async fn wait_ready(&self) {
        while let Some(wait) = self.remaining_wait() {
            tracing::info!(wait_secs = wait.as_secs(), "Waiting for rate limit reset");
            tokio::time::sleep(wait).await;
        }
    }
}

/// HTTP client for the GitHub GraphQL API
pub struct GitHubClient {
    http_client: reqwest::Client,
    api_url: String,
    page_size: u32,
    rate_limit: RateLimitGate,
}

impl GitHubClient {
    /// Create a new client from configuration.
    ///
    /// Returns an error if the configuration is invalid or the token is
    /// missing.
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        config.validate()?;

        let token = config
            .resolved_token()
            .ok_or_else(|| Error::Config("github token is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("commitscope"));

        let auth_value = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| Error::Config(format!("invalid github token: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_url: config.api_url.clone(),
            page_size: config.page_size,
            rate_limit: RateLimitGate::new(),
        })
    }

    /// Access the shared rate-limit gate (for observability).
    pub fn rate_limit_gate(&self) -> &RateLimitGate {
        &self.rate_limit
    }

    /// Classify an HTTP-level failure into the error taxonomy.
    fn classify_status(status: StatusCode, retry_after: Option<u64>, body: &str) -> Error {
        if status == StatusCode::TOO_MANY_REQUESTS
            || (status == StatusCode::FORBIDDEN && body.to_lowercase().contains("rate limit"))
        {
            return Error::RateLimited {
                retry_after_secs: retry_after,
            };
        }
        if status.is_server_error() {
            return Error::SourceTransient(format!("API error ({}): {}", status, body));
        }
        Error::Source(format!("API error ({}): {}", status, body))
    }

    fn normalize_commit(node: CommitNode, repository: &str) -> Result<Option<Commit>> {
        // Merge commits are excluded from analytics
        if node.parents.total_count > 1 {
            return Ok(None);
        }

        let author = node.author.ok_or_else(|| {
            Error::MalformedResponse(format!("commit {} has no author block", node.oid))
        })?;

        let author_date = DateTime::parse_from_rfc3339(&author.date)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                Error::MalformedResponse(format!(
                    "commit {} has unparseable author date {:?}: {}",
                    node.oid, author.date, e
                ))
            })?;

        let (message_title, message_body) = Commit::split_message(&node.message);

        Ok(Some(Commit {
            sha: node.oid,
            author_name: author.name.unwrap_or_else(|| "unknown".to_string()),
            author_email: author.email,
            author_date,
            message_title,
            message_body,
            additions: node.additions,
            deletions: node.deletions,
            total_changes: node.additions + node.deletions,
            repository: repository.to_string(),
            created_at: Utc::now(),
            z_score: None,
        }))
    }

    fn update_gate(&self, rate_limit: &RateLimitInfo) {
        if rate_limit.remaining > 1 {
            return;
        }
        if let Ok(reset_at) = DateTime::parse_from_rfc3339(&rate_limit.reset_at) {
            let wait = (reset_at.with_timezone(&Utc) - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tracing::warn!(
                wait_secs = wait.as_secs(),
                "GitHub rate limit budget exhausted, parking all fetches"
            );
            self.rate_limit.block_for(wait + Duration::from_secs(1));
        }
    }
}

#[async_trait]
impl CommitSource for GitHubClient {
    async fn fetch_page(
        &self,
        repo: &RepoId,
        range: &DateRange,
        cursor: Option<&str>,
    ) -> Result<CommitPage> {
        // Honor a reset deadline observed by any concurrent fetch
        self.rate_limit.wait_ready().await;

        let body = serde_json::json!({
            "query": COMMIT_HISTORY_QUERY,
            "variables": {
                "owner": repo.owner,
                "name": repo.name,
                "pageSize": self.page_size,
                "after": cursor,
                "since": range.since().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                "until": range.until().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            },
        });

        tracing::debug!(repo = %repo, %range, cursor = ?cursor, "Fetching commit page");

        let response = self
            .http_client
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    Error::SourceTransient(format!("HTTP request failed: {}", e))
                } else {
                    Error::Source(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());

            let err = Self::classify_status(status, retry_after, &text);
            if let Error::RateLimited { retry_after_secs } = &err {
                let wait = Duration::from_secs(retry_after_secs.unwrap_or(60));
                self.rate_limit.block_for(wait);
            }
            return Err(err);
        }

        let payload: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("failed to parse response: {}", e)))?;

        if !payload.errors.is_empty() {
            if payload
                .errors
                .iter()
                .any(|e| e.kind.as_deref() == Some("RATE_LIMITED"))
            {
                self.rate_limit.block_for(Duration::from_secs(60));
                return Err(Error::RateLimited {
                    retry_after_secs: None,
                });
            }
            let messages: Vec<&str> = payload.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(Error::Source(format!(
                "GraphQL errors: {}",
                messages.join("; ")
            )));
        }

        let data = payload
            .data
            .ok_or_else(|| Error::MalformedResponse("response carried no data".to_string()))?;

        if let Some(rate_limit) = &data.rate_limit {
            self.update_gate(rate_limit);
        }

        let repository_node = data
            .repository
            .ok_or_else(|| Error::Source(format!("repository not found: {}", repo)))?;

        // A repository with no default branch has no history at all
        let history = match repository_node
            .default_branch_ref
            .and_then(|r| r.target)
            .and_then(|t| t.history)
        {
            Some(history) => history,
            None => {
                return Ok(CommitPage {
                    commits: Vec::new(),
                    next_cursor: None,
                })
            }
        };

        let repository = repo.full_name();
        let mut commits = Vec::with_capacity(history.nodes.len());
        for node in history.nodes {
            if let Some(commit) = Self::normalize_commit(node, &repository)? {
                commits.push(commit);
            }
        }

        let next_cursor = if history.page_info.has_next_page {
            match history.page_info.end_cursor {
                Some(cursor) => Some(cursor),
                None => {
                    return Err(Error::MalformedResponse(
                        "page claims a next page but carries no end cursor".to_string(),
                    ))
                }
            }
        } else {
            None
        };

        Ok(CommitPage {
            commits,
            next_cursor,
        })
    }
}

// ============================================
// GraphQL response shapes
// ============================================

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<QueryData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    repository: Option<RepositoryNode>,
    #[serde(rename = "rateLimit")]
    rate_limit: Option<RateLimitInfo>,
}

#[derive(Debug, Deserialize)]
struct RepositoryNode {
    #[serde(rename = "defaultBranchRef")]
    default_branch_ref: Option<BranchRef>,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    target: Option<CommitTarget>,
}

#[derive(Debug, Deserialize)]
struct CommitTarget {
    history: Option<HistoryConnection>,
}

#[derive(Debug, Deserialize)]
struct HistoryConnection {
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<CommitNode>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitNode {
    oid: String,
    message: String,
    author: Option<CommitAuthor>,
    #[serde(default)]
    additions: i64,
    #[serde(default)]
    deletions: i64,
    parents: ParentCount,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    name: Option<String>,
    email: Option<String>,
    date: String,
}

#[derive(Debug, Deserialize)]
struct ParentCount {
    #[serde(rename = "totalCount")]
    total_count: i64,
}

#[derive(Debug, Deserialize)]
struct RateLimitInfo {
    remaining: i64,
    #[serde(rename = "resetAt")]
    reset_at: String,
}
