//! Database layer for the harvest services
//!
//! Provides:
//! - SeaORM entity models
//! - The persistence and session store contracts used by the worker
//! - A Postgres repository and an in-memory store implementing them
//! - Connection pool management and migrations

mod memory;
pub mod models;
mod repository;

pub use memory::MemoryStore;
pub use repository::Repository;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use crate::harvest::{
    AuthorFields, HarvestContext, HarvestStatus, PaperFields, SessionCounters, SessionTransition,
    TransitionOutcome,
};
use async_trait::async_trait;
use models::{Author, HarvestSession, Paper};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Idempotent upsert store for harvested records
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Create or wholly replace the paper keyed by `external_id`.
    /// Returns the stored row and whether it was newly created.
    async fn upsert_paper(
        &self,
        external_id: &str,
        fields: &PaperFields,
        context: &HarvestContext,
    ) -> Result<(Paper, bool)>;

    /// Create or wholly replace the author keyed by `external_id`
    async fn upsert_author(&self, external_id: &str, fields: &AuthorFields) -> Result<(Author, bool)>;

    /// Replace the paper's author set with exactly `author_ids`, in order
    async fn set_paper_authors(&self, paper_id: Uuid, author_ids: &[Uuid]) -> Result<()>;
}

/// Storage for harvest session bookkeeping
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: HarvestSession) -> Result<HarvestSession>;

    async fn find_session(&self, id: Uuid) -> Result<Option<HarvestSession>>;

    async fn find_session_by_token(&self, job_token: &str) -> Result<Option<HarvestSession>>;

    /// Apply a transition only if the stored status still allows it.
    /// Fails with `SessionNotFound` when the row is gone.
    async fn apply_transition(&self, id: Uuid, transition: SessionTransition) -> Result<TransitionOutcome>;

    /// Write progress counters without changing status
    async fn update_counters(&self, id: Uuid, counters: SessionCounters) -> Result<()>;

    /// Sessions of a profile, newest completion first
    async fn list_sessions(
        &self,
        profile_id: Uuid,
        status: Option<HarvestStatus>,
    ) -> Result<Vec<HarvestSession>>;
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    pub primary: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let primary = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");

        Ok(Self { primary })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Apply pending SQL migrations from `migrations/`
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(self.primary.get_postgres_connection_pool())
            .await?;
        info!("Migrations applied");
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;

        Ok(())
    }
}
