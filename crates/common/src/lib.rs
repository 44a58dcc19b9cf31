//! Scholar Harvest Common Library
//!
//! Shared code for the harvest services including:
//! - Harvest domain types (requests, session lifecycle, normalized records)
//! - Database models, the Postgres repository and an in-memory store
//! - Job queue abstraction (SQS and in-process)
//! - Job submission and status polling
//! - Error types, configuration and metrics

pub mod config;
pub mod db;
pub mod errors;
pub mod harvest;
pub mod metrics;
pub mod queue;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{MemoryStore, PersistenceGateway, Repository, SessionStore};
pub use errors::{AppError, Result};
pub use harvest::{HarvestRequest, HarvestService, HarvestStatus, RawAuthor, RawPaper};
pub use queue::{HarvestJobMessage, JobQueue, LocalQueue, SqsQueue};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Canonical page URL template for provider papers
pub const PAPER_URL_BASE: &str = "https://www.semanticscholar.org/paper";

/// Canonical page URL template for provider authors
pub const AUTHOR_URL_BASE: &str = "https://www.semanticscholar.org/author";
