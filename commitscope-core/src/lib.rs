//! # commitscope-core
//!
//! Core library for commitscope - a GitHub commit analytics backend.
//!
//! This library provides:
//! - Domain types for commits, date ranges, and cache state
//! - Database storage layer with SQLite
//! - A resumable, rate-limit-aware fetch pipeline over the GitHub
//!   GraphQL commit-history API
//! - Read-side analytics (outliers, day-of-week activity, word
//!   frequencies, authors)
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Source:** GitHub GraphQL API, paginated with opaque cursors
//! - **Canonical:** the `commits` table, deduplicated by sha
//! - **Derived:** per-range cache state, z-scores, and word-frequency
//!   counts (all regenerable from the canonical layer plus a refetch)
//!
//! ## Example
//!
//! ```rust,no_run
//! use commitscope_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use analytics::AnalyticsEngine;
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use fetch::{BackoffPolicy, FetchOrchestrator};
pub use github::{CommitPage, CommitSource, GitHubClient};
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod github;
pub mod logging;
pub mod types;
