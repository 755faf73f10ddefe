//! Pulse Client - HTTP clients for external sources
//!
//! This crate provides:
//!
//! - [`jira`] - Jira Cloud issue search
//! - [`github`] - GitHub commit listing
//! - [`source`] - Enum dispatch over both, for runtime source selection
//! - [`config_provider`] - Tenant configuration from `tenants.toml`
//!
//! # Overview
//!
//! The clients handle authentication, request building, response parsing
//! and HTTP status classification. Retries, rate limiting and circuit
//! breaking are not done here: the orchestrator wraps every call in a
//! `pulse_core::ResiliencePipeline`.

pub mod config_provider;
pub mod github;
mod http;
pub mod jira;
pub mod source;

pub use config_provider::FileConfigProvider;
pub use github::GithubClient;
pub use jira::JiraClient;
pub use source::SourceClientEnum;
