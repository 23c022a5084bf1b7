//! Fetch orchestration: the incremental fetch-and-cache pipeline
//!
//! This module reconciles the paginated, rate-limited commit source
//! against the local cache, keyed by (repository, date range).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────────┐     ┌─────────────────┐
//! │  CommitSource   │ ──► │ FetchOrchestrator │ ──► │    Database     │
//! │ (GitHub GraphQL)│     │                   │     │ (commits, cache)│
//! └─────────────────┘     └───────────────────┘     └─────────────────┘
//! ```
//!
//! Per page, "upsert the page's commits" and "advance the cursor" happen
//! in one transaction, so the cursor can never point past data that is
//! not durably stored. A crash mid-fetch resumes from the persisted
//! cursor; the worst case is one redundantly re-fetched page, never a
//! gap.

pub mod backoff;

pub use backoff::BackoffPolicy;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::github::CommitSource;
use crate::types::{DateRange, FetchReport, RepoId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Outlier threshold and word-frequency bookkeeping live elsewhere; the
/// orchestrator's single job is making "the range is complete" true.
///
/// Cloning is cheap (all shared state is behind `Arc`); clones observe
/// the same in-flight range set.
#[derive(Clone)]
pub struct FetchOrchestrator {
    db: Arc<Database>,
    source: Arc<dyn CommitSource>,
    backoff: BackoffPolicy,
    in_flight: Arc<Mutex<HashSet<RangeKey>>>,
}

type RangeKey = (String, DateRange);

/// RAII registration of an in-flight range walk.
///
/// Dropping the guard releases the range, including when the fetch task
/// panics or errors out partway.
struct RangeLock {
    in_flight: Arc<Mutex<HashSet<RangeKey>>>,
    key: RangeKey,
}

impl RangeLock {
    /// Try to claim a range; `None` when a walk is already in flight.
    fn try_acquire(in_flight: &Arc<Mutex<HashSet<RangeKey>>>, key: RangeKey) -> Option<Self> {
        let mut guard = in_flight.lock().unwrap();
        if !guard.insert(key.clone()) {
            return None;
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            key,
        })
    }
}

impl Drop for RangeLock {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.key);
    }
}

impl FetchOrchestrator {
    pub fn new(db: Arc<Database>, source: Arc<dyn CommitSource>, backoff: BackoffPolicy) -> Self {
        Self {
            db,
            source,
            backoff,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Ensure commit data for (repo, range) is complete in the store.
    ///
    /// - Completed range and `force_refresh` off: cache hit, zero source
    ///   calls.
    /// - Partial range: resumes from the stored cursor.
    /// - `force_refresh`: invalidates the range and re-walks every page;
    ///   previously stored commits are upserted again, which is harmless.
    ///
    /// Failures come back as a report with `success == false` rather
    /// than an error, so callers can fall back to stale cached data. The
    /// page walk runs on a spawned task: a caller that disconnects
    /// mid-fetch leaves the walk running to completion instead of
    /// aborting it mid-page.
    pub async fn ensure_data(
        &self,
        repo: RepoId,
        range: DateRange,
        force_refresh: bool,
    ) -> FetchReport {
        let repository = repo.full_name();

        // Empty window: trivially complete with zero commits, and
        // distinguishable from "not yet fetched" via the completed row.
        if range.is_empty() {
            return match self.complete_empty_range(&repository, &range) {
                Ok(report) => report,
                Err(e) => FetchReport::failure(format!("fetch failed: {}", e), 0),
            };
        }

        let key = (repository.clone(), range);
        let Some(lock) = RangeLock::try_acquire(&self.in_flight, key) else {
            tracing::info!(repo = %repository, %range, "Fetch already in progress, coalescing");
            return FetchReport::failure("fetch already in progress for this range", 0);
        };

        let orchestrator = self.clone();
        let handle = tokio::spawn(async move {
            let _lock = lock;
            orchestrator.run_fetch(&repo, &range, force_refresh).await
        });

        match handle.await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => FetchReport::failure(format!("fetch failed: {}", e), 0),
            Err(e) => FetchReport::failure(format!("fetch task failed: {}", e), 0),
        }
    }

    fn complete_empty_range(&self, repository: &str, range: &DateRange) -> Result<FetchReport> {
        self.db.begin_or_resume_range(repository, range)?;
        self.db.mark_range_completed(repository, range)?;
        Ok(FetchReport {
            success: true,
            message: "empty range, nothing to fetch".to_string(),
            pages_fetched: 0,
            cache_used: false,
            commit_count: 0,
            mean_changes: None,
            std_changes: None,
        })
    }

    async fn run_fetch(
        &self,
        repo: &RepoId,
        range: &DateRange,
        force_refresh: bool,
    ) -> Result<FetchReport> {
        let repository = repo.full_name();

        // Fast path: completed range, no network call at all
        if !force_refresh {
            if let Some(row) = self.db.cache_range(&repository, range)? {
                if row.completed {
                    tracing::info!(repo = %repository, %range, "Cache hit, serving stored commits");
                    self.ensure_word_frequencies(&repository, range, false)?;
                    let commit_count = self.db.count_commits_in_range(&repository, range)?;
                    return Ok(FetchReport {
                        success: true,
                        message: "using cached data".to_string(),
                        pages_fetched: 0,
                        cache_used: true,
                        commit_count,
                        mean_changes: None,
                        std_changes: None,
                    });
                }
            }
        }

        let state = self.db.begin_or_resume_range(&repository, range)?;

        let mut cursor = if force_refresh {
            // Reset completed + cursor but keep the stored commits; the
            // re-walk upserts them again by sha.
            self.db.invalidate_range(&repository, range)?;
            None
        } else {
            if state.last_cursor.is_some() {
                tracing::info!(
                    repo = %repository,
                    %range,
                    "Resuming partial fetch from stored cursor"
                );
            }
            state.last_cursor
        };

        let mut pages_fetched = 0u32;

        loop {
            let page = match self.fetch_page_with_retry(repo, range, cursor.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    // Cursor still points at the last durably stored
                    // page; a later call resumes exactly there.
                    tracing::error!(repo = %repository, %range, error = %e, "Fetch failed");
                    return Ok(FetchReport::failure(
                        format!("fetch failed: {}", e),
                        pages_fetched,
                    ));
                }
            };

            let next_cursor = page.next_cursor.clone();
            self.db
                .store_page(&repository, range, &page.commits, next_cursor.as_deref())?;
            pages_fetched += 1;

            tracing::debug!(
                repo = %repository,
                %range,
                page = pages_fetched,
                commits = page.commits.len(),
                has_next = next_cursor.is_some(),
                "Stored commit page"
            );

            match next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        self.db.mark_range_completed(&repository, range)?;

        let stats = self.db.compute_z_scores(&repository, range)?;
        self.ensure_word_frequencies(&repository, range, true)?;

        tracing::info!(
            repo = %repository,
            %range,
            pages = pages_fetched,
            commits = stats.count,
            "Fetch complete"
        );

        Ok(FetchReport {
            success: true,
            message: "data fetched successfully".to_string(),
            pages_fetched,
            cache_used: false,
            commit_count: stats.count,
            mean_changes: (stats.count > 0).then_some(stats.mean),
            std_changes: (stats.count > 0).then_some(stats.stddev),
        })
    }

    /// Fetch one page, retrying transient failures with backoff.
    ///
    /// A failed attempt never advances the cursor, so an interrupted
    /// attempt resumes at the same page.
    async fn fetch_page_with_retry(
        &self,
        repo: &RepoId,
        range: &DateRange,
        cursor: Option<&str>,
    ) -> Result<crate::github::CommitPage> {
        let mut last_error: Option<Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            if attempt > 0 {
                let delay = self.backoff.delay_for(attempt - 1);
                tracing::warn!(
                    repo = %repo,
                    attempt,
                    max = self.backoff.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying page fetch after transient failure"
                );
                tokio::time::sleep(delay).await;
            }

            match self.source.fetch_page(repo, range, cursor).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() => {
                    last_error = Some(e);
                }
                // Malformed pages and hard failures are never retried
                // and never skipped: the whole fetch fails instead.
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::SourceTransient("retries exhausted".to_string())))
    }

    /// (Re)build the word-frequency index for a range.
    ///
    /// `rebuild` forces recomputation (fresh or forced fetches); cache
    /// hits only fill the index when it is absent.
    fn ensure_word_frequencies(
        &self,
        repository: &str,
        range: &DateRange,
        rebuild: bool,
    ) -> Result<()> {
        if !rebuild && self.db.has_word_frequencies(repository, range)? {
            return Ok(());
        }

        let commits =
            self.db
                .commits_in_range(repository, range, &crate::types::CommitFilter::default())?;
        let counts = crate::analytics::words::count_words(commits.iter().map(|c| {
            match &c.message_body {
                Some(body) => format!("{} {}", c.message_title, body),
                None => c.message_title.clone(),
            }
        }));

        self.db.replace_word_frequencies(repository, range, &counts)?;
        tracing::debug!(
            repo = %repository,
            %range,
            words = counts.len(),
            "Word-frequency index rebuilt"
        );
        Ok(())
    }
}
