//! Postgres repository
//!
//! Upserts go through raw statements so creation and replacement happen in one
//! atomic round trip keyed on `external_id`. Session transitions are
//! compare-and-set on the previously observed status.

use crate::db::models::*;
use crate::db::{DbPool, PersistenceGateway, SessionStore};
use crate::errors::{AppError, Result};
use crate::harvest::{
    AuthorFields, HarvestContext, HarvestStatus, PaperFields, SessionCounters, SessionTransition,
    TransitionOutcome,
};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    FromQueryResult, IntoActiveModel, QueryFilter, QueryOrder, QueryResult, Set, Statement,
    TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

const UPSERT_PAPER_SQL: &str = r#"
    INSERT INTO papers (
        id, external_id, profile_id, session_id, title, abstract_text,
        publication_year, venue, doi, url, pdf_url, citation_count,
        reference_count, influential_citation_count, is_open_access,
        scraped_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW(), NOW())
    ON CONFLICT (external_id) DO UPDATE SET
        profile_id = EXCLUDED.profile_id,
        session_id = EXCLUDED.session_id,
        title = EXCLUDED.title,
        abstract_text = EXCLUDED.abstract_text,
        publication_year = EXCLUDED.publication_year,
        venue = EXCLUDED.venue,
        doi = EXCLUDED.doi,
        url = EXCLUDED.url,
        pdf_url = EXCLUDED.pdf_url,
        citation_count = EXCLUDED.citation_count,
        reference_count = EXCLUDED.reference_count,
        influential_citation_count = EXCLUDED.influential_citation_count,
        is_open_access = EXCLUDED.is_open_access,
        updated_at = EXCLUDED.updated_at
    RETURNING *, (xmax = 0) AS inserted
"#;

const UPSERT_AUTHOR_SQL: &str = r#"
    INSERT INTO authors (
        id, external_id, full_name, url, h_index, paper_count,
        citation_count, affiliations, created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
    ON CONFLICT (external_id) DO UPDATE SET
        full_name = EXCLUDED.full_name,
        url = EXCLUDED.url,
        h_index = EXCLUDED.h_index,
        paper_count = EXCLUDED.paper_count,
        citation_count = EXCLUDED.citation_count,
        affiliations = EXCLUDED.affiliations,
        updated_at = EXCLUDED.updated_at
    RETURNING *, (xmax = 0) AS inserted
"#;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    async fn upsert_returning<M: FromQueryResult>(&self, stmt: Statement) -> Result<(M, bool)> {
        let row: QueryResult = self
            .conn()
            .query_one(stmt)
            .await?
            .ok_or_else(|| AppError::Internal {
                message: "upsert returned no row".to_string(),
            })?;

        let model = M::from_query_result(&row, "")?;
        let inserted: bool = row.try_get("", "inserted")?;
        Ok((model, inserted))
    }
}

#[async_trait]
impl PersistenceGateway for Repository {
    async fn upsert_paper(
        &self,
        external_id: &str,
        fields: &PaperFields,
        context: &HarvestContext,
    ) -> Result<(Paper, bool)> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            UPSERT_PAPER_SQL,
            vec![
                Uuid::new_v4().into(),
                external_id.into(),
                context.profile_id.into(),
                context.session_id.into(),
                fields.title.clone().into(),
                fields.abstract_text.clone().into(),
                fields.publication_year.into(),
                fields.venue.clone().into(),
                fields.doi.clone().into(),
                fields.url.clone().into(),
                fields.pdf_url.clone().into(),
                fields.citation_count.into(),
                fields.reference_count.into(),
                fields.influential_citation_count.into(),
                fields.is_open_access.into(),
            ],
        );

        let (paper, created): (Paper, bool) = self.upsert_returning(stmt).await?;
        debug!(external_id, paper_id = %paper.id, created, "Paper upserted");
        Ok((paper, created))
    }

    async fn upsert_author(&self, external_id: &str, fields: &AuthorFields) -> Result<(Author, bool)> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            UPSERT_AUTHOR_SQL,
            vec![
                Uuid::new_v4().into(),
                external_id.into(),
                fields.full_name.clone().into(),
                fields.url.clone().into(),
                fields.h_index.into(),
                fields.paper_count.into(),
                fields.citation_count.into(),
                serde_json::json!(fields.affiliations).into(),
            ],
        );

        self.upsert_returning(stmt).await
    }

    async fn set_paper_authors(&self, paper_id: Uuid, author_ids: &[Uuid]) -> Result<()> {
        let txn = self.conn().begin().await?;

        PaperAuthorEntity::delete_many()
            .filter(PaperAuthorColumn::PaperId.eq(paper_id))
            .exec(&txn)
            .await?;

        if !author_ids.is_empty() {
            let rows = author_ids
                .iter()
                .enumerate()
                .map(|(position, author_id)| PaperAuthorActiveModel {
                    paper_id: Set(paper_id),
                    author_id: Set(*author_id),
                    position: Set(position as i32),
                });

            PaperAuthorEntity::insert_many(rows)
                .exec_without_returning(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Repository {
    async fn create_session(&self, session: HarvestSession) -> Result<HarvestSession> {
        session
            .into_active_model()
            .reset_all()
            .insert(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<HarvestSession>> {
        HarvestSessionEntity::find_by_id(id)
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn find_session_by_token(&self, job_token: &str) -> Result<Option<HarvestSession>> {
        HarvestSessionEntity::find()
            .filter(HarvestSessionColumn::JobToken.eq(job_token))
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn apply_transition(&self, id: Uuid, transition: SessionTransition) -> Result<TransitionOutcome> {
        let current = self
            .find_session(id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })?;

        let next = match transition.apply(&current, chrono::Utc::now().into()) {
            Ok(next) => next,
            Err(AppError::InvalidTransition { .. }) => {
                return Ok(TransitionOutcome::Rejected {
                    current: current.status(),
                })
            }
            Err(e) => return Err(e),
        };

        let result = HarvestSessionEntity::update_many()
            .set(next.clone().into_active_model().reset_all())
            .filter(HarvestSessionColumn::Id.eq(id))
            .filter(HarvestSessionColumn::Status.eq(current.status.clone()))
            .exec(self.conn())
            .await?;

        if result.rows_affected == 0 {
            // Someone else moved the session between our read and write
            let current = self
                .find_session(id)
                .await?
                .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })?;
            return Ok(TransitionOutcome::Rejected {
                current: current.status(),
            });
        }

        Ok(TransitionOutcome::Applied(next))
    }

    async fn update_counters(&self, id: Uuid, counters: SessionCounters) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE harvest_sessions SET papers_found = $1, papers_saved = $2, errors_count = $3 WHERE id = $4",
            vec![
                counters.papers_found.into(),
                counters.papers_saved.into(),
                counters.errors_count.into(),
                id.into(),
            ],
        );

        let result = self.conn().execute(stmt).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::SessionNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn list_sessions(
        &self,
        profile_id: Uuid,
        status: Option<HarvestStatus>,
    ) -> Result<Vec<HarvestSession>> {
        let mut query = HarvestSessionEntity::find().filter(HarvestSessionColumn::ProfileId.eq(profile_id));

        if let Some(status) = status {
            query = query.filter(HarvestSessionColumn::Status.eq(status.as_str()));
        }

        query
            .order_by_desc(HarvestSessionColumn::CompletedAt)
            .order_by_desc(HarvestSessionColumn::CreatedAt)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }
}
