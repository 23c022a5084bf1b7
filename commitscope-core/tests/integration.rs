//! Integration tests for the commitscope fetch pipeline
//!
//! These tests drive the orchestrator end-to-end against a scripted
//! in-memory commit source and an in-memory SQLite database, verifying
//! resume correctness, cache behavior, retry handling, and the
//! completeness invariant without any network.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use commitscope_core::db::Database;
use commitscope_core::fetch::{BackoffPolicy, FetchOrchestrator};
use commitscope_core::github::{CommitPage, CommitSource};
use commitscope_core::types::{Commit, CommitFilter, DateRange, RepoId};
use commitscope_core::Error;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================
// Scripted source
// ============================================

/// A commit source backed by a fixed page list.
///
/// Cursors are page indexes rendered as strings, which is enough to
/// behave like an opaque resumption token. A queue of scripted steps
/// can inject failures before individual calls: `None` lets a call
/// through, `Some(err)` fails it.
struct ScriptedSource {
    pages: Vec<Vec<Commit>>,
    script: Mutex<VecDeque<Option<Error>>>,
    calls: AtomicU32,
    delay: Duration,
}

impl ScriptedSource {
    fn new(pages: Vec<Vec<Commit>>) -> Self {
        Self {
            pages,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn push_step(&self, step: Option<Error>) {
        self.script.lock().unwrap().push_back(step);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommitSource for ScriptedSource {
    async fn fetch_page(
        &self,
        _repo: &RepoId,
        _range: &DateRange,
        cursor: Option<&str>,
    ) -> commitscope_core::Result<CommitPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(step) = self.script.lock().unwrap().pop_front() {
            if let Some(err) = step {
                return Err(err);
            }
        }

        let index = match cursor {
            Some(c) => c.parse::<usize>().expect("scripted cursor") + 1,
            None => 0,
        };

        let commits = self.pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < self.pages.len()).then(|| index.to_string());

        Ok(CommitPage {
            commits,
            next_cursor,
        })
    }
}

// ============================================
// Helpers
// ============================================

fn repo() -> RepoId {
    RepoId::new("octo", "widgets")
}

fn range() -> DateRange {
    DateRange::new(
        "2024-03-01".parse().unwrap(),
        "2024-03-31".parse().unwrap(),
    )
}

fn commit(sha: &str, day: u32, total: i64) -> Commit {
    Commit {
        sha: sha.to_string(),
        author_name: "Alice".to_string(),
        author_email: None,
        author_date: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
        message_title: format!("Fix bug {}", sha),
        message_body: None,
        additions: total,
        deletions: 0,
        total_changes: total,
        repository: "octo/widgets".to_string(),
        created_at: Utc::now(),
        z_score: None,
    }
}

fn three_pages() -> Vec<Vec<Commit>> {
    vec![
        vec![commit("a1", 1, 10), commit("a2", 2, 12)],
        vec![commit("b1", 10, 8), commit("b2", 11, 300)],
        vec![commit("c1", 20, 9)],
    ]
}

fn orchestrator(source: Arc<ScriptedSource>, retries: u32) -> (Arc<FetchOrchestrator>, Arc<Database>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.migrate().unwrap();
    let orchestrator = Arc::new(FetchOrchestrator::new(
        Arc::clone(&db),
        source,
        BackoffPolicy::immediate(retries),
    ));
    (orchestrator, db)
}

fn stored_shas(db: &Database) -> Vec<String> {
    db.commits_in_range("octo/widgets", &range(), &CommitFilter::default())
        .unwrap()
        .into_iter()
        .map(|c| c.sha)
        .collect()
}

// ============================================
// Full fetch
// ============================================

#[tokio::test]
async fn test_fetch_stores_all_pages() {
    let source = Arc::new(ScriptedSource::new(three_pages()));
    let (orchestrator, db) = orchestrator(Arc::clone(&source), 3);

    let report = orchestrator.ensure_data(repo(), range(), false).await;

    assert!(report.success, "{}", report.message);
    assert_eq!(report.pages_fetched, 3);
    assert!(!report.cache_used);
    assert_eq!(report.commit_count, 5);
    assert!(report.mean_changes.is_some());
    assert!(report.std_changes.is_some());

    // Completeness: every commit the source knows is in the store
    let mut shas = stored_shas(&db);
    shas.sort();
    assert_eq!(shas, vec!["a1", "a2", "b1", "b2", "c1"]);

    let row = db.cache_range("octo/widgets", &range()).unwrap().unwrap();
    assert!(row.completed);
    assert!(row.last_cursor.is_none());

    // Derived state was rebuilt alongside the commits
    assert!(db.has_word_frequencies("octo/widgets", &range()).unwrap());
    let commits = db
        .commits_in_range("octo/widgets", &range(), &CommitFilter::default())
        .unwrap();
    assert!(commits.iter().all(|c| c.z_score.is_some()));
}

#[tokio::test]
async fn test_cache_hit_avoids_network() {
    let source = Arc::new(ScriptedSource::new(three_pages()));
    let (orchestrator, _db) = orchestrator(Arc::clone(&source), 3);

    let first = orchestrator.ensure_data(repo(), range(), false).await;
    assert!(first.success);
    let calls_after_first = source.calls();
    assert_eq!(calls_after_first, 3);

    let second = orchestrator.ensure_data(repo(), range(), false).await;
    assert!(second.success);
    assert!(second.cache_used);
    assert_eq!(second.pages_fetched, 0);
    assert_eq!(second.commit_count, 5);

    // Zero additional source calls on the second run
    assert_eq!(source.calls(), calls_after_first);
}

// ============================================
// Resume
// ============================================

#[tokio::test]
async fn test_resume_after_interruption_matches_uninterrupted_fetch() {
    let source = Arc::new(ScriptedSource::new(three_pages()));
    // One retry per page; let page 1 through, then fail page 2 twice
    source.push_step(None);
    source.push_step(Some(Error::SourceTransient("connection reset".into())));
    source.push_step(Some(Error::SourceTransient("connection reset".into())));
    let (orchestrator, db) = orchestrator(Arc::clone(&source), 1);

    let interrupted = orchestrator.ensure_data(repo(), range(), false).await;
    assert!(!interrupted.success);
    assert_eq!(interrupted.pages_fetched, 1);

    // Cursor parked at the last durably stored page
    let row = db.cache_range("octo/widgets", &range()).unwrap().unwrap();
    assert!(!row.completed);
    assert_eq!(row.last_cursor.as_deref(), Some("0"));
    assert_eq!(stored_shas(&db), vec!["a1", "a2"]);

    // Resume: only the remaining pages are fetched
    let calls_before_resume = source.calls();
    let resumed = orchestrator.ensure_data(repo(), range(), false).await;
    assert!(resumed.success, "{}", resumed.message);
    assert_eq!(resumed.pages_fetched, 2);
    assert_eq!(source.calls() - calls_before_resume, 2);

    // No duplicates, no gaps: same content as an uninterrupted fetch
    let mut shas = stored_shas(&db);
    shas.sort();
    assert_eq!(shas, vec!["a1", "a2", "b1", "b2", "c1"]);

    let row = db.cache_range("octo/widgets", &range()).unwrap().unwrap();
    assert!(row.completed);
}

#[tokio::test]
async fn test_transient_failure_retries_same_page() {
    let source = Arc::new(ScriptedSource::new(three_pages()));
    source.push_step(Some(Error::RateLimited {
        retry_after_secs: None,
    }));
    let (orchestrator, db) = orchestrator(Arc::clone(&source), 2);

    let report = orchestrator.ensure_data(repo(), range(), false).await;
    assert!(report.success, "{}", report.message);
    assert_eq!(report.pages_fetched, 3);
    // 3 pages + 1 failed attempt
    assert_eq!(source.calls(), 4);
    assert_eq!(stored_shas(&db).len(), 5);
}

#[tokio::test]
async fn test_exhausted_retries_surface_failure() {
    let source = Arc::new(ScriptedSource::new(three_pages()));
    for _ in 0..3 {
        source.push_step(Some(Error::SourceTransient("timeout".into())));
    }
    let (orchestrator, db) = orchestrator(Arc::clone(&source), 2);

    let report = orchestrator.ensure_data(repo(), range(), false).await;
    assert!(!report.success);
    assert!(report.message.contains("timeout"));
    assert_eq!(report.pages_fetched, 0);

    // Nothing stored, nothing completed, no cursor to corrupt a resume
    let row = db.cache_range("octo/widgets", &range()).unwrap().unwrap();
    assert!(!row.completed);
    assert!(row.last_cursor.is_none());
    assert!(stored_shas(&db).is_empty());
}

#[tokio::test]
async fn test_malformed_page_fails_whole_fetch_without_retry() {
    let source = Arc::new(ScriptedSource::new(three_pages()));
    source.push_step(None);
    source.push_step(Some(Error::MalformedResponse("missing history".into())));
    let (orchestrator, db) = orchestrator(Arc::clone(&source), 3);

    let report = orchestrator.ensure_data(repo(), range(), false).await;
    assert!(!report.success);
    assert!(report.message.contains("malformed"));
    // Page 1 succeeded, page 2 failed exactly once: malformed responses
    // are never retried and never skipped
    assert_eq!(source.calls(), 2);

    let row = db.cache_range("octo/widgets", &range()).unwrap().unwrap();
    assert!(!row.completed);
}

// ============================================
// Force refresh
// ============================================

#[tokio::test]
async fn test_force_refresh_rewalks_but_preserves_rows() {
    let source = Arc::new(ScriptedSource::new(three_pages()));
    let (orchestrator, db) = orchestrator(Arc::clone(&source), 3);

    let first = orchestrator.ensure_data(repo(), range(), false).await;
    assert!(first.success);
    let count_before = db.count_commits_in_range("octo/widgets", &range()).unwrap();

    let refreshed = orchestrator.ensure_data(repo(), range(), true).await;
    assert!(refreshed.success);
    assert!(!refreshed.cache_used);
    assert_eq!(refreshed.pages_fetched, 3);

    // Source data did not change, so neither did the store
    let count_after = db.count_commits_in_range("octo/widgets", &range()).unwrap();
    assert_eq!(count_before, count_after);

    let row = db.cache_range("octo/widgets", &range()).unwrap().unwrap();
    assert!(row.completed);
}

// ============================================
// Edge cases
// ============================================

#[tokio::test]
async fn test_empty_window_completes_without_fetching() {
    let source = Arc::new(ScriptedSource::new(three_pages()));
    let (orchestrator, db) = orchestrator(Arc::clone(&source), 3);

    let inverted = DateRange::new(
        "2024-03-10".parse().unwrap(),
        "2024-03-01".parse().unwrap(),
    );
    let report = orchestrator.ensure_data(repo(), inverted, false).await;
    assert!(report.success);
    assert_eq!(report.commit_count, 0);
    assert_eq!(source.calls(), 0);

    // Completed with zero commits is distinguishable from "not fetched"
    let row = db.cache_range("octo/widgets", &inverted).unwrap().unwrap();
    assert!(row.completed);
}

#[tokio::test]
async fn test_range_with_no_commits_completes() {
    let source = Arc::new(ScriptedSource::new(vec![vec![]]));
    let (orchestrator, db) = orchestrator(Arc::clone(&source), 3);

    let report = orchestrator.ensure_data(repo(), range(), false).await;
    assert!(report.success);
    assert_eq!(report.commit_count, 0);
    assert_eq!(report.pages_fetched, 1);

    let row = db.cache_range("octo/widgets", &range()).unwrap().unwrap();
    assert!(row.completed);
}

// ============================================
// Concurrency
// ============================================

#[tokio::test]
async fn test_concurrent_same_range_coalesces() {
    let source = Arc::new(
        ScriptedSource::new(three_pages()).with_delay(Duration::from_millis(50)),
    );
    let (orchestrator, _db) = orchestrator(Arc::clone(&source), 3);

    let first = orchestrator.ensure_data(repo(), range(), false);
    let second = orchestrator.ensure_data(repo(), range(), false);
    let (first, second) = tokio::join!(first, second);

    // Exactly one walk ran; the other coalesced into a no-op
    let outcomes = [first.success, second.success];
    assert_eq!(outcomes.iter().filter(|s| **s).count(), 1);
    let coalesced = if first.success { &second } else { &first };
    assert!(coalesced.message.contains("already in progress"));

    // No duplicate page walk: the source saw each page once
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn test_distinct_ranges_fetch_independently() {
    let source = Arc::new(ScriptedSource::new(three_pages()));
    let (orchestrator, db) = orchestrator(Arc::clone(&source), 3);

    let april = DateRange::new(
        "2024-04-01".parse().unwrap(),
        "2024-04-30".parse().unwrap(),
    );

    let march = orchestrator.ensure_data(repo(), range(), false).await;
    let april_report = orchestrator.ensure_data(repo(), april, false).await;
    assert!(march.success);
    assert!(april_report.success);

    // Each distinct (start, end) pair is cached independently
    assert!(db.cache_range("octo/widgets", &range()).unwrap().unwrap().completed);
    assert!(db.cache_range("octo/widgets", &april).unwrap().unwrap().completed);
}
