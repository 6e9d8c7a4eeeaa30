//! SQLite persistence for pools, quotes, the action history and the job queue.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - `Repository`, which implements the store, quote, action-log and queue
//!   collaborator traits on top of one connection pool

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{JobRecord, Repository};
