//! Read-side analytics over the commit store
//!
//! The engine computes everything from stored commits (and the
//! precomputed word-frequency index); it never talks to the source API.
//! It assumes the store is complete for any range the fetch pipeline has
//! reported success on, and performs no completeness validation of its
//! own.

pub mod words;

use crate::db::Database;
use crate::error::Result;
use crate::types::{Commit, CommitFilter, DateRange, MetricType, RepoId, WordFrequency, WEEKDAYS};
use std::sync::Arc;

/// Commits whose |z| exceeds this are reported as outliers.
pub const OUTLIER_THRESHOLD: f64 = 2.0;

/// Read-side analytics engine.
pub struct AnalyticsEngine {
    db: Arc<Database>,
}

impl AnalyticsEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Commits whose total change size deviates significantly from the
    /// range's mean, ordered by |z| descending (ties by sha).
    ///
    /// Commits without a computed z-score are never outliers.
    pub fn outliers(&self, repo: &RepoId, range: &DateRange) -> Result<Vec<Commit>> {
        let mut outliers: Vec<Commit> = self
            .db
            .commits_in_range(&repo.full_name(), range, &CommitFilter::default())?
            .into_iter()
            .filter(|c| c.z_score.is_some_and(|z| z.abs() > OUTLIER_THRESHOLD))
            .collect();

        outliers.sort_by(|a, b| {
            let za = a.z_score.unwrap_or(0.0).abs();
            let zb = b.z_score.unwrap_or(0.0).abs();
            zb.partial_cmp(&za)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.sha.cmp(&b.sha))
        });

        Ok(outliers)
    }

    /// Aggregate of `metric` per weekday, in fixed Sun..Sat order.
    ///
    /// Always returns exactly 7 buckets; weekdays without activity carry
    /// 0 rather than being omitted.
    pub fn day_of_week_activity(
        &self,
        repo: &RepoId,
        range: &DateRange,
        metric: MetricType,
        author: Option<&str>,
    ) -> Result<Vec<(&'static str, i64)>> {
        let totals = self
            .db
            .day_of_week_totals(&repo.full_name(), range, metric, author)?;

        let mut buckets = [0i64; 7];
        for (dow, value) in totals {
            if dow < 7 {
                buckets[dow] = value;
            }
        }

        Ok(WEEKDAYS
            .iter()
            .zip(buckets)
            .map(|(day, value)| (*day, value))
            .collect())
    }

    /// Top word frequencies for a range, count descending (ties lexical).
    ///
    /// Serves the precomputed index when present; otherwise falls back
    /// to counting stored commit messages on the fly, without writing
    /// the index (the fetch pipeline owns index lifecycle).
    pub fn word_frequencies(
        &self,
        repo: &RepoId,
        range: &DateRange,
        limit: usize,
    ) -> Result<Vec<WordFrequency>> {
        let repository = repo.full_name();

        if self.db.has_word_frequencies(&repository, range)? {
            return self.db.word_frequencies(&repository, range, limit);
        }

        let commits = self
            .db
            .commits_in_range(&repository, range, &CommitFilter::default())?;
        let mut counts = words::count_words(commits.iter().map(|c| match &c.message_body {
            Some(body) => format!("{} {}", c.message_title, body),
            None => c.message_title.clone(),
        }));
        counts.truncate(limit);

        Ok(counts
            .into_iter()
            .map(|(word, frequency)| WordFrequency { word, frequency })
            .collect())
    }

    /// Distinct author names within the range, sorted.
    pub fn authors(&self, repo: &RepoId, range: &DateRange) -> Result<Vec<String>> {
        self.db.authors_in_range(&repo.full_name(), range)
    }
}
