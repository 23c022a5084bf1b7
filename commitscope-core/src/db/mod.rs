//! Database layer for commitscope
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - Range-cache tracking for resumable fetches

pub mod repo;
pub mod schema;

pub use repo::{ChangeStats, Database};
