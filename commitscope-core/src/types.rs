//! Core domain types for commitscope
//!
//! These types represent the canonical data model: commits fetched from a
//! repository's history, plus the cache bookkeeping that makes fetches
//! resumable.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Range** | A (repository, start date, end date) triple identifying a unit of cacheable fetch work |
//! | **Cursor** | Opaque pagination token from the source API marking resumption position |
//! | **Completed range** | A range for which every commit has been durably fetched and stored |
//! | **Outlier** | A commit whose total line changes deviate from the range's mean by more than a fixed number of standard deviations |

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Repository identity
// ============================================

/// A GitHub repository, identified by owner and name.
///
/// Rendered as `owner/name` everywhere a single string is needed
/// (database columns, log fields, API payloads).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Returns the `owner/name` form used for storage and display.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ============================================
// Date ranges
// ============================================

/// A date range with an inclusive end date.
///
/// `end` covers the whole day: the UTC bounds are
/// `[start 00:00:00, end + 1 day 00:00:00)`. A range with `start == end`
/// therefore spans exactly one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First day included in the range
    pub start: NaiveDate,
    /// Last day included in the range
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// True when the range covers no time at all (inverted bounds).
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// UTC instant at which the range begins (inclusive).
    pub fn since(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.start.and_hms_opt(0, 0, 0).expect("valid midnight"))
    }

    /// UTC instant at which the range ends (exclusive).
    pub fn until(&self) -> DateTime<Utc> {
        let next = self.end + Duration::days(1);
        Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0).expect("valid midnight"))
    }

    /// True when `ts` falls within the range's UTC bounds.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.since() && ts < self.until()
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// ============================================
// Commits
// ============================================

/// A single commit as stored in the `commits` table.
///
/// `total_changes` is always `additions + deletions`; the storage layer
/// recomputes it on every write so the invariant cannot drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    /// Commit sha (unique within the store)
    pub sha: String,
    /// Author name
    pub author_name: String,
    /// Author email (optional)
    pub author_email: Option<String>,
    /// Author timestamp
    pub author_date: DateTime<Utc>,
    /// First line of the commit message
    pub message_title: String,
    /// Remainder of the commit message (optional)
    pub message_body: Option<String>,
    /// Lines added
    pub additions: i64,
    /// Lines deleted
    pub deletions: i64,
    /// `additions + deletions` (derived)
    pub total_changes: i64,
    /// Repository this commit belongs to, as `owner/name`
    pub repository: String,
    /// When this row was first ingested
    pub created_at: DateTime<Utc>,
    /// Standard-score of `total_changes` within its range (computed lazily)
    pub z_score: Option<f64>,
}

impl Commit {
    /// Split a raw commit message into title and optional body.
    pub fn split_message(message: &str) -> (String, Option<String>) {
        match message.trim().split_once('\n') {
            Some((title, body)) => {
                let body = body.trim();
                (
                    title.trim().to_string(),
                    (!body.is_empty()).then(|| body.to_string()),
                )
            }
            None => (message.trim().to_string(), None),
        }
    }
}

/// Optional filters for range queries over the commit store.
#[derive(Debug, Clone, Default)]
pub struct CommitFilter {
    /// Only commits by this author name (exact match)
    pub author: Option<String>,
}

// ============================================
// Cache ranges
// ============================================

/// Fetch bookkeeping for one (repository, range) tuple.
///
/// A completed range guarantees every commit authored within the range is
/// present in the commit store. A non-completed range's cursor, if
/// present, is the exact pagination position to resume from.
#[derive(Debug, Clone)]
pub struct CacheRange {
    /// Repository as `owner/name`
    pub repository: String,
    /// The cached date range
    pub range: DateRange,
    /// Opaque resumption token from the source API
    pub last_cursor: Option<String>,
    /// Whether the range has been fetched to the end of pagination
    pub completed: bool,
    /// Last time this row was touched
    pub last_updated: DateTime<Utc>,
}

// ============================================
// Word frequencies
// ============================================

/// One precomputed word count for a (repository, range) tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordFrequency {
    /// Lower-cased token from commit messages
    pub word: String,
    /// Number of occurrences within the range
    pub frequency: i64,
}

// ============================================
// Analytics metrics
// ============================================

/// Which aggregate the day-of-week endpoint should compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Commit count
    Commits,
    /// Sum of lines added
    Additions,
    /// Sum of lines deleted
    Deletions,
    /// Sum of total line changes
    TotalChanges,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Commits => "commits",
            MetricType::Additions => "additions",
            MetricType::Deletions => "deletions",
            MetricType::TotalChanges => "total_changes",
        }
    }
}

impl std::str::FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commits" => Ok(MetricType::Commits),
            "additions" => Ok(MetricType::Additions),
            "deletions" => Ok(MetricType::Deletions),
            "total_changes" => Ok(MetricType::TotalChanges),
            _ => Err(format!("unknown metric type: {}", s)),
        }
    }
}

/// Weekday labels in fixed Sun..Sat order, matching the dashboard.
pub const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

// ============================================
// Fetch reports
// ============================================

/// Result of a `FetchOrchestrator::ensure_data` call.
///
/// Failures are reported through this struct rather than as errors so the
/// caller can decide to serve stale cached data when a refresh fails.
#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    /// Whether the range is now known to be complete
    pub success: bool,
    /// Human-readable outcome description
    pub message: String,
    /// Pages fetched from the source during this call
    pub pages_fetched: u32,
    /// True when the call was served entirely from cache
    pub cache_used: bool,
    /// Commits within the range after the call
    pub commit_count: i64,
    /// Mean of total_changes over the range (None when empty)
    pub mean_changes: Option<f64>,
    /// Sample standard deviation of total_changes (None when empty)
    pub std_changes: Option<f64>,
}

impl FetchReport {
    /// A failure report with zero statistics.
    pub fn failure(message: impl Into<String>, pages_fetched: u32) -> Self {
        Self {
            success: false,
            message: message.into(),
            pages_fetched,
            cache_used: false,
            commit_count: 0,
            mean_changes: None,
            std_changes: None,
        }
    }
}
