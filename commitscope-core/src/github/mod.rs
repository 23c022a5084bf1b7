//! Commit-history source layer
//!
//! The fetch orchestrator only sees the [`CommitSource`] trait; the real
//! implementation is [`client::GitHubClient`] against the GitHub GraphQL
//! API. Tests substitute a scripted source, which is how resume and
//! backoff behavior are verified without a network.

pub mod client;

pub use client::{GitHubClient, RateLimitGate};

use crate::error::Result;
use crate::types::{Commit, DateRange, RepoId};
use async_trait::async_trait;

/// One page of commit history from the source.
#[derive(Debug, Clone)]
pub struct CommitPage {
    /// Commits on this page, already normalized to [`Commit`]
    pub commits: Vec<Commit>,
    /// Cursor for the next page; `None` at the end of pagination
    pub next_cursor: Option<String>,
}

/// A paginated, range-filtered commit history source.
///
/// Implementations must treat `cursor` as opaque: it is whatever the
/// previous page's `next_cursor` was, persisted across process restarts.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Fetch a single page of commits for `repo` within `range`,
    /// starting after `cursor` (or from the beginning when `None`).
    async fn fetch_page(
        &self,
        repo: &RepoId,
        range: &DateRange,
        cursor: Option<&str>,
    ) -> Result<CommitPage>;
}
