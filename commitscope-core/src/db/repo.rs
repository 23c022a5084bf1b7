//! Database repository layer
//!
//! Provides query and insert operations for commits, cache ranges, and
//! precomputed word frequencies. All timestamps are stored as RFC 3339
//! UTC strings, so lexicographic comparison in SQL matches chronological
//! order.

use crate::error::{Error, Result};
use crate::types::{CacheRange, Commit, CommitFilter, DateRange, MetricType, WordFrequency};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// Mean / standard deviation of `total_changes` over a queried commit set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeStats {
    /// Number of commits in the set
    pub count: i64,
    /// Mean of total_changes
    pub mean: f64,
    /// Standard deviation of total_changes (0 for uniform sets)
    pub stddev: f64,
}

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL mode for better concurrency between the fetch path and reads
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Commit operations
    // ============================================

    /// Insert or update a commit, keyed by sha.
    ///
    /// `total_changes` is recomputed from additions + deletions on every
    /// write. Re-upserting identical data is a no-op in effect, which is
    /// what makes forced refetches and resumed fetches safe.
    pub fn upsert_commit(&self, commit: &Commit) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::upsert_commit_inner(&conn, commit)
    }

    fn upsert_commit_inner(conn: &Connection, commit: &Commit) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO commits (sha, author_name, author_email, author_date, message_title,
                                 message_body, additions, deletions, total_changes,
                                 repository, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?7 + ?8, ?9, ?10)
            ON CONFLICT(sha) DO UPDATE SET
                author_name = excluded.author_name,
                author_email = excluded.author_email,
                author_date = excluded.author_date,
                message_title = excluded.message_title,
                message_body = excluded.message_body,
                additions = excluded.additions,
                deletions = excluded.deletions,
                total_changes = excluded.total_changes,
                repository = excluded.repository
            "#,
            params![
                commit.sha,
                commit.author_name,
                commit.author_email,
                commit.author_date.to_rfc3339(),
                commit.message_title,
                commit.message_body,
                commit.additions,
                commit.deletions,
                commit.repository,
                commit.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a single commit by sha
    pub fn get_commit(&self, sha: &str) -> Result<Option<Commit>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM commits WHERE sha = ?", [sha], |row| {
            Self::row_to_commit(row)
        })
        .optional()
        .map_err(Error::from)
    }

    /// Query commits for a repository within a range, oldest first.
    ///
    /// Ties on author_date break by sha so the ordering is deterministic.
    pub fn commits_in_range(
        &self,
        repository: &str,
        range: &DateRange,
        filter: &CommitFilter,
    ) -> Result<Vec<Commit>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            "SELECT * FROM commits
             WHERE repository = ? AND author_date >= ? AND author_date < ?",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(repository.to_string()),
            Box::new(range.since().to_rfc3339()),
            Box::new(range.until().to_rfc3339()),
        ];

        if let Some(author) = &filter.author {
            sql.push_str(" AND author_name = ?");
            params.push(Box::new(author.clone()));
        }

        sql.push_str(" ORDER BY author_date ASC, sha ASC");

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let commits = stmt
            .query_map(params_refs.as_slice(), Self::row_to_commit)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(commits)
    }

    /// Count commits for a repository within a range
    pub fn count_commits_in_range(&self, repository: &str, range: &DateRange) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM commits
             WHERE repository = ? AND author_date >= ? AND author_date < ?",
            params![
                repository,
                range.since().to_rfc3339(),
                range.until().to_rfc3339()
            ],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Distinct author names within a range, sorted.
    pub fn authors_in_range(&self, repository: &str, range: &DateRange) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT author_name FROM commits
             WHERE repository = ? AND author_date >= ? AND author_date < ?
             ORDER BY author_name ASC",
        )?;

        let authors = stmt
            .query_map(
                params![
                    repository,
                    range.since().to_rfc3339(),
                    range.until().to_rfc3339()
                ],
                |row| row.get(0),
            )?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(authors)
    }

    /// Compute and persist z-scores for every commit in the range.
    ///
    /// z = (total_changes - mean) / stddev, with z = 0 for every commit
    /// when the stddev is 0 (uniform commit sizes). The whole update runs
    /// in one transaction so readers never observe a half-scored range.
    pub fn compute_z_scores(&self, repository: &str, range: &DateRange) -> Result<ChangeStats> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let changes: Vec<(i64, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT id, total_changes FROM commits
                 WHERE repository = ? AND author_date >= ? AND author_date < ?",
            )?;
            let rows = stmt
                .query_map(
                    params![
                        repository,
                        range.since().to_rfc3339(),
                        range.until().to_rfc3339()
                    ],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        if changes.is_empty() {
            tx.commit()?;
            return Ok(ChangeStats::default());
        }

        let n = changes.len() as f64;
        let mean = changes.iter().map(|(_, c)| *c as f64).sum::<f64>() / n;
        let variance = changes
            .iter()
            .map(|(_, c)| {
                let d = *c as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let stddev = variance.sqrt();

        for (id, total) in &changes {
            let z = if stddev > 0.0 {
                (*total as f64 - mean) / stddev
            } else {
                0.0
            };
            tx.execute(
                "UPDATE commits SET z_score = ?1 WHERE id = ?2",
                params![z, id],
            )?;
        }

        tx.commit()?;

        Ok(ChangeStats {
            count: changes.len() as i64,
            mean,
            stddev,
        })
    }

    /// Day-of-week totals for a range.
    ///
    /// Returns `(weekday_index, value)` pairs where index 0 is Sunday,
    /// only for weekdays that have any activity; the analytics layer
    /// zero-fills the rest.
    pub fn day_of_week_totals(
        &self,
        repository: &str,
        range: &DateRange,
        metric: MetricType,
        author: Option<&str>,
    ) -> Result<Vec<(usize, i64)>> {
        let conn = self.conn.lock().unwrap();

        let value_expr = match metric {
            MetricType::Commits => "COUNT(*)",
            MetricType::Additions => "COALESCE(SUM(additions), 0)",
            MetricType::Deletions => "COALESCE(SUM(deletions), 0)",
            MetricType::TotalChanges => "COALESCE(SUM(total_changes), 0)",
        };

        let mut sql = format!(
            "SELECT CAST(strftime('%w', author_date) AS INTEGER) AS dow, {} AS value
             FROM commits
             WHERE repository = ? AND author_date >= ? AND author_date < ?",
            value_expr
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(repository.to_string()),
            Box::new(range.since().to_rfc3339()),
            Box::new(range.until().to_rfc3339()),
        ];

        if let Some(author) = author {
            sql.push_str(" AND author_name = ?");
            params.push(Box::new(author.to_string()));
        }

        sql.push_str(" GROUP BY dow ORDER BY dow");

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let totals = stmt
            .query_map(params_refs.as_slice(), |row| {
                let dow: i64 = row.get(0)?;
                let value: i64 = row.get(1)?;
                Ok((dow as usize, value))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(totals)
    }

    fn row_to_commit(row: &Row) -> rusqlite::Result<Commit> {
        let author_date_str: String = row.get("author_date")?;
        let created_at_str: String = row.get("created_at")?;

        Ok(Commit {
            sha: row.get("sha")?,
            author_name: row.get("author_name")?,
            author_email: row.get("author_email")?,
            author_date: DateTime::parse_from_rfc3339(&author_date_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            message_title: row.get("message_title")?,
            message_body: row.get("message_body")?,
            additions: row.get("additions")?,
            deletions: row.get("deletions")?,
            total_changes: row.get("total_changes")?,
            repository: row.get("repository")?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            z_score: row.get("z_score")?,
        })
    }

    // ============================================
    // Cache range operations
    // ============================================

    /// Exact-match lookup of a cache range.
    ///
    /// No interval merging: each distinct (start, end) pair is cached
    /// independently.
    pub fn cache_range(&self, repository: &str, range: &DateRange) -> Result<Option<CacheRange>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM cache_status
             WHERE repository = ? AND start_date = ? AND end_date = ?",
            params![
                repository,
                range.start.to_string(),
                range.end.to_string()
            ],
            Self::row_to_cache_range,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Create a cache range row if none exists, then return its state.
    ///
    /// A fresh row starts with no cursor and completed = false.
    pub fn begin_or_resume_range(&self, repository: &str, range: &DateRange) -> Result<CacheRange> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                r#"
                INSERT OR IGNORE INTO cache_status
                    (repository, start_date, end_date, last_cursor, completed, last_updated)
                VALUES (?1, ?2, ?3, NULL, 0, ?4)
                "#,
                params![
                    repository,
                    range.start.to_string(),
                    range.end.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }

        self.cache_range(repository, range)?
            .ok_or_else(|| Error::Config("cache range row missing after insert".to_string()))
    }

    /// Store one fetched page atomically.
    ///
    /// Upserts the page's commits and advances the cursor in a single
    /// transaction, so a crash mid-page can never leave the cursor ahead
    /// of the stored data. When the page carries no next cursor the
    /// previous cursor is kept; a crash before `mark_range_completed`
    /// then re-fetches only the final page on resume.
    pub fn store_page(
        &self,
        repository: &str,
        range: &DateRange,
        commits: &[Commit],
        next_cursor: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for commit in commits {
            Self::upsert_commit_inner(&tx, commit)?;
        }

        tx.execute(
            r#"
            UPDATE cache_status
            SET last_cursor = COALESCE(?1, last_cursor), last_updated = ?2
            WHERE repository = ?3 AND start_date = ?4 AND end_date = ?5
            "#,
            params![
                next_cursor,
                Utc::now().to_rfc3339(),
                repository,
                range.start.to_string(),
                range.end.to_string(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Mark a range as fully fetched and clear its cursor.
    pub fn mark_range_completed(&self, repository: &str, range: &DateRange) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE cache_status
            SET completed = 1, last_cursor = NULL, last_updated = ?1
            WHERE repository = ?2 AND start_date = ?3 AND end_date = ?4
            "#,
            params![
                Utc::now().to_rfc3339(),
                repository,
                range.start.to_string(),
                range.end.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Reset a range for a forced refetch.
    ///
    /// Clears completed and cursor without deleting previously stored
    /// commits; the re-walk upserts them again, which is idempotent.
    pub fn invalidate_range(&self, repository: &str, range: &DateRange) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE cache_status
            SET completed = 0, last_cursor = NULL, last_updated = ?1
            WHERE repository = ?2 AND start_date = ?3 AND end_date = ?4
            "#,
            params![
                Utc::now().to_rfc3339(),
                repository,
                range.start.to_string(),
                range.end.to_string(),
            ],
        )?;
        Ok(())
    }

    fn row_to_cache_range(row: &Row) -> rusqlite::Result<CacheRange> {
        let start_str: String = row.get("start_date")?;
        let end_str: String = row.get("end_date")?;
        let last_updated_str: String = row.get("last_updated")?;
        let completed: i64 = row.get("completed")?;

        Ok(CacheRange {
            repository: row.get("repository")?,
            range: DateRange {
                start: start_str
                    .parse::<NaiveDate>()
                    .unwrap_or_else(|_| Utc::now().date_naive()),
                end: end_str
                    .parse::<NaiveDate>()
                    .unwrap_or_else(|_| Utc::now().date_naive()),
            },
            last_cursor: row.get("last_cursor")?,
            completed: completed != 0,
            last_updated: DateTime::parse_from_rfc3339(&last_updated_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    // ============================================
    // Word frequency operations
    // ============================================

    /// Replace the precomputed word frequencies for a range.
    ///
    /// Deletes stale rows for the exact range and inserts the new counts
    /// in one transaction.
    pub fn replace_word_frequencies(
        &self,
        repository: &str,
        range: &DateRange,
        frequencies: &[(String, i64)],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM commit_word_frequencies
             WHERE repository = ?1 AND start_date = ?2 AND end_date = ?3",
            params![
                repository,
                range.start.to_string(),
                range.end.to_string()
            ],
        )?;

        for (word, frequency) in frequencies {
            tx.execute(
                r#"
                INSERT INTO commit_word_frequencies (word, frequency, repository, start_date, end_date)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    word,
                    frequency,
                    repository,
                    range.start.to_string(),
                    range.end.to_string(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Precomputed word frequencies for an exact range, highest first.
    ///
    /// Ties break by word so the ordering is deterministic.
    pub fn word_frequencies(
        &self,
        repository: &str,
        range: &DateRange,
        limit: usize,
    ) -> Result<Vec<WordFrequency>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT word, frequency FROM commit_word_frequencies
             WHERE repository = ?1 AND start_date = ?2 AND end_date = ?3
             ORDER BY frequency DESC, word ASC
             LIMIT ?4",
        )?;

        let frequencies = stmt
            .query_map(
                params![
                    repository,
                    range.start.to_string(),
                    range.end.to_string(),
                    limit as i64
                ],
                |row| {
                    Ok(WordFrequency {
                        word: row.get(0)?,
                        frequency: row.get(1)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(frequencies)
    }

    /// True when any precomputed frequencies exist for the exact range.
    pub fn has_word_frequencies(&self, repository: &str, range: &DateRange) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM commit_word_frequencies
             WHERE repository = ?1 AND start_date = ?2 AND end_date = ?3",
            params![
                repository,
                range.start.to_string(),
                range.end.to_string()
            ],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn test_range() -> DateRange {
        DateRange::new(
            "2024-03-01".parse().unwrap(),
            "2024-03-31".parse().unwrap(),
        )
    }

    fn test_commit(sha: &str, day: u32, total: i64) -> Commit {
        Commit {
            sha: sha.to_string(),
            author_name: "Alice".to_string(),
            author_email: Some("alice@example.com".to_string()),
            author_date: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            message_title: "Fix bug".to_string(),
            message_body: None,
            additions: total,
            deletions: 0,
            total_changes: total,
            repository: "octo/widgets".to_string(),
            created_at: Utc::now(),
            z_score: None,
        }
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("data.db");

        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        assert!(path.exists());

        // Reopening an existing database is fine and keeps its data
        db.upsert_commit(&test_commit("abc", 1, 5)).unwrap();
        drop(db);
        let reopened = Database::open(&path).unwrap();
        reopened.migrate().unwrap();
        assert!(reopened.get_commit("abc").unwrap().is_some());
    }

    #[test]
    fn test_upsert_commit_idempotent() {
        let db = test_db();
        let commit = test_commit("abc123", 5, 10);

        db.upsert_commit(&commit).unwrap();
        db.upsert_commit(&commit).unwrap();

        let commits = db
            .commits_in_range("octo/widgets", &test_range(), &CommitFilter::default())
            .unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].sha, "abc123");
    }

    #[test]
    fn test_upsert_recomputes_total_changes() {
        let db = test_db();
        let mut commit = test_commit("abc123", 5, 10);
        commit.additions = 7;
        commit.deletions = 4;
        // Deliberately wrong derived value; the store must not trust it.
        commit.total_changes = 999;

        db.upsert_commit(&commit).unwrap();
        let stored = db.get_commit("abc123").unwrap().unwrap();
        assert_eq!(stored.total_changes, 11);
    }

    #[test]
    fn test_commits_in_range_ordering_and_bounds() {
        let db = test_db();
        db.upsert_commit(&test_commit("bbb", 10, 5)).unwrap();
        db.upsert_commit(&test_commit("aaa", 10, 5)).unwrap();
        db.upsert_commit(&test_commit("ccc", 2, 5)).unwrap();
        // Outside the range entirely
        let mut outside = test_commit("ddd", 5, 5);
        outside.author_date = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        db.upsert_commit(&outside).unwrap();

        let commits = db
            .commits_in_range("octo/widgets", &test_range(), &CommitFilter::default())
            .unwrap();
        let shas: Vec<_> = commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec!["ccc", "aaa", "bbb"]);
    }

    #[test]
    fn test_commits_in_range_includes_end_of_day() {
        let db = test_db();
        let mut commit = test_commit("eod", 31, 5);
        commit.author_date = Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap();
        db.upsert_commit(&commit).unwrap();

        let commits = db
            .commits_in_range("octo/widgets", &test_range(), &CommitFilter::default())
            .unwrap();
        assert_eq!(commits.len(), 1);
    }

    #[test]
    fn test_author_filter() {
        let db = test_db();
        db.upsert_commit(&test_commit("aaa", 5, 5)).unwrap();
        let mut other = test_commit("bbb", 6, 5);
        other.author_name = "Bob".to_string();
        db.upsert_commit(&other).unwrap();

        let filter = CommitFilter {
            author: Some("Bob".to_string()),
        };
        let commits = db
            .commits_in_range("octo/widgets", &test_range(), &filter)
            .unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].author_name, "Bob");

        let authors = db.authors_in_range("octo/widgets", &test_range()).unwrap();
        assert_eq!(authors, vec!["Alice".to_string(), "Bob".to_string()]);
    }

    #[test]
    fn test_z_scores_deterministic() {
        let db = test_db();
        db.upsert_commit(&test_commit("a", 1, 10)).unwrap();
        db.upsert_commit(&test_commit("b", 2, 20)).unwrap();
        db.upsert_commit(&test_commit("c", 3, 30)).unwrap();

        let stats = db.compute_z_scores("octo/widgets", &test_range()).unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.mean - 20.0).abs() < 1e-9);

        let commits = db
            .commits_in_range("octo/widgets", &test_range(), &CommitFilter::default())
            .unwrap();
        let z: Vec<f64> = commits.iter().map(|c| c.z_score.unwrap()).collect();
        assert!(z[0] < 0.0 && z[2] > 0.0);
        assert!((z[1]).abs() < 1e-9);

        // Running it again yields the same values
        db.compute_z_scores("octo/widgets", &test_range()).unwrap();
        let again = db
            .commits_in_range("octo/widgets", &test_range(), &CommitFilter::default())
            .unwrap();
        for (before, after) in commits.iter().zip(again.iter()) {
            assert_eq!(before.z_score, after.z_score);
        }
    }

    #[test]
    fn test_z_scores_zero_when_uniform() {
        let db = test_db();
        db.upsert_commit(&test_commit("a", 1, 42)).unwrap();
        db.upsert_commit(&test_commit("b", 2, 42)).unwrap();

        let stats = db.compute_z_scores("octo/widgets", &test_range()).unwrap();
        assert_eq!(stats.stddev, 0.0);

        let commits = db
            .commits_in_range("octo/widgets", &test_range(), &CommitFilter::default())
            .unwrap();
        assert!(commits.iter().all(|c| c.z_score == Some(0.0)));
    }

    #[test]
    fn test_cache_range_lifecycle() {
        let db = test_db();
        let range = test_range();

        assert!(db.cache_range("octo/widgets", &range).unwrap().is_none());

        let created = db.begin_or_resume_range("octo/widgets", &range).unwrap();
        assert!(!created.completed);
        assert!(created.last_cursor.is_none());

        db.store_page("octo/widgets", &range, &[test_commit("a", 1, 5)], Some("cursor-1"))
            .unwrap();
        let resumed = db.begin_or_resume_range("octo/widgets", &range).unwrap();
        assert_eq!(resumed.last_cursor.as_deref(), Some("cursor-1"));

        // Final page carries no cursor; the previous one is kept so a
        // crash before completion resumes at the last page.
        db.store_page("octo/widgets", &range, &[test_commit("b", 2, 5)], None)
            .unwrap();
        let kept = db.cache_range("octo/widgets", &range).unwrap().unwrap();
        assert_eq!(kept.last_cursor.as_deref(), Some("cursor-1"));

        db.mark_range_completed("octo/widgets", &range).unwrap();
        let completed = db.cache_range("octo/widgets", &range).unwrap().unwrap();
        assert!(completed.completed);
        assert!(completed.last_cursor.is_none());
    }

    #[test]
    fn test_invalidate_preserves_commits() {
        let db = test_db();
        let range = test_range();

        db.begin_or_resume_range("octo/widgets", &range).unwrap();
        db.store_page("octo/widgets", &range, &[test_commit("a", 1, 5)], None)
            .unwrap();
        db.mark_range_completed("octo/widgets", &range).unwrap();

        db.invalidate_range("octo/widgets", &range).unwrap();
        let row = db.cache_range("octo/widgets", &range).unwrap().unwrap();
        assert!(!row.completed);
        assert!(row.last_cursor.is_none());
        assert_eq!(db.count_commits_in_range("octo/widgets", &range).unwrap(), 1);
    }

    #[test]
    fn test_exact_match_lookup_only() {
        let db = test_db();
        let range = test_range();
        db.begin_or_resume_range("octo/widgets", &range).unwrap();
        db.mark_range_completed("octo/widgets", &range).unwrap();

        // A sub-range of a completed range is still a cache miss.
        let narrower = DateRange::new(
            "2024-03-05".parse().unwrap(),
            "2024-03-10".parse().unwrap(),
        );
        assert!(db.cache_range("octo/widgets", &narrower).unwrap().is_none());
    }

    #[test]
    fn test_word_frequency_replace_and_order() {
        let db = test_db();
        let range = test_range();

        db.replace_word_frequencies(
            "octo/widgets",
            &range,
            &[
                ("bug".to_string(), 2),
                ("fix".to_string(), 2),
                ("add".to_string(), 1),
            ],
        )
        .unwrap();

        let freqs = db.word_frequencies("octo/widgets", &range, 2).unwrap();
        assert_eq!(freqs.len(), 2);
        assert_eq!(freqs[0].word, "bug");
        assert_eq!(freqs[1].word, "fix");

        // Replacing drops the previous rows entirely
        db.replace_word_frequencies("octo/widgets", &range, &[("refactor".to_string(), 3)])
            .unwrap();
        let freqs = db.word_frequencies("octo/widgets", &range, 10).unwrap();
        assert_eq!(freqs.len(), 1);
        assert_eq!(freqs[0].word, "refactor");
        assert!(db.has_word_frequencies("octo/widgets", &range).unwrap());
    }

    #[test]
    fn test_day_of_week_totals() {
        let db = test_db();
        // 2024-03-03 is a Sunday, 2024-03-04 a Monday
        db.upsert_commit(&test_commit("a", 3, 10)).unwrap();
        db.upsert_commit(&test_commit("b", 3, 20)).unwrap();
        db.upsert_commit(&test_commit("c", 4, 5)).unwrap();

        let totals = db
            .day_of_week_totals("octo/widgets", &test_range(), MetricType::Commits, None)
            .unwrap();
        assert_eq!(totals, vec![(0, 2), (1, 1)]);

        let totals = db
            .day_of_week_totals(
                "octo/widgets",
                &test_range(),
                MetricType::TotalChanges,
                None,
            )
            .unwrap();
        assert_eq!(totals, vec![(0, 30), (1, 5)]);
    }
}
