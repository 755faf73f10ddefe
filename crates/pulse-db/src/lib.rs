//! Pulse DB - PostgreSQL persistence layer
//!
//! This crate provides the repository pattern for synced activity data and
//! sync job tracking.
//!
//! # Overview
//!
//! The main components are:
//! - [`ActivityRepository`] - Chunked idempotent upserts of activities,
//!   Jira issues and GitHub commits
//! - [`JobRepository`] - Sync job lifecycle and history queries
//! - [`LockRepository`] - Named locks so one replica runs each scheduled sync
//! - [`ensure_schema`] - Creates the tables on a fresh database

mod activity_repository;
mod job_repository;
mod lock_repository;
mod schema;

pub use activity_repository::ActivityRepository;
pub use job_repository::JobRepository;
pub use lock_repository::LockRepository;
pub use schema::{SCHEMA, ensure_schema};
