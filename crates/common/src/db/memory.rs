//! In-memory store
//!
//! Same contracts as [`Repository`](super::Repository) over a mutex-guarded
//! map. Used by tests and by the worker's one-shot mode.

use crate::db::models::{Author, HarvestSession, Paper};
use crate::db::{PersistenceGateway, SessionStore};
use crate::errors::{AppError, Result};
use crate::harvest::{
    AuthorFields, HarvestContext, HarvestStatus, PaperFields, SessionCounters, SessionTransition,
    TransitionOutcome,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    papers: HashMap<String, Paper>,
    authors: HashMap<String, Author>,
    /// paper id -> ordered author ids
    paper_authors: HashMap<Uuid, Vec<Uuid>>,
    sessions: HashMap<Uuid, HarvestSession>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| AppError::Internal {
            message: "memory store lock poisoned".to_string(),
        })
    }

    pub fn paper_count(&self) -> usize {
        self.lock().map(|s| s.papers.len()).unwrap_or(0)
    }

    pub fn author_count(&self) -> usize {
        self.lock().map(|s| s.authors.len()).unwrap_or(0)
    }

    pub fn paper(&self, external_id: &str) -> Option<Paper> {
        self.lock().ok()?.papers.get(external_id).cloned()
    }

    pub fn author(&self, external_id: &str) -> Option<Author> {
        self.lock().ok()?.authors.get(external_id).cloned()
    }

    /// All stored papers ordered by provider id
    pub fn papers(&self) -> Vec<Paper> {
        let mut papers: Vec<Paper> = self
            .lock()
            .map(|s| s.papers.values().cloned().collect())
            .unwrap_or_default();
        papers.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        papers
    }

    /// Provider ids of a paper's authors, in association order
    pub fn paper_author_ids(&self, paper_id: Uuid) -> Vec<String> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let Some(ids) = state.paper_authors.get(&paper_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                state
                    .authors
                    .values()
                    .find(|a| a.id == *id)
                    .map(|a| a.external_id.clone())
            })
            .collect()
    }

    /// Remove a session row, as the surrounding system may do at any time
    pub fn delete_session(&self, id: Uuid) -> bool {
        self.lock()
            .map(|mut s| s.sessions.remove(&id).is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn upsert_paper(
        &self,
        external_id: &str,
        fields: &PaperFields,
        context: &HarvestContext,
    ) -> Result<(Paper, bool)> {
        let now = chrono::Utc::now().into();
        let mut state = self.lock()?;

        match state.papers.get_mut(external_id) {
            Some(existing) => {
                existing.replace_fields(fields, context, now);
                Ok((existing.clone(), false))
            }
            None => {
                let paper = Paper::from_fields(Uuid::new_v4(), external_id, fields, context, now);
                state.papers.insert(external_id.to_string(), paper.clone());
                Ok((paper, true))
            }
        }
    }

    async fn upsert_author(&self, external_id: &str, fields: &AuthorFields) -> Result<(Author, bool)> {
        let now = chrono::Utc::now().into();
        let mut state = self.lock()?;

        match state.authors.get_mut(external_id) {
            Some(existing) => {
                existing.replace_fields(fields, now);
                Ok((existing.clone(), false))
            }
            None => {
                let author = Author::from_fields(Uuid::new_v4(), external_id, fields, now);
                state.authors.insert(external_id.to_string(), author.clone());
                Ok((author, true))
            }
        }
    }

    async fn set_paper_authors(&self, paper_id: Uuid, author_ids: &[Uuid]) -> Result<()> {
        let mut state = self.lock()?;
        state.paper_authors.insert(paper_id, author_ids.to_vec());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: HarvestSession) -> Result<HarvestSession> {
        let mut state = self.lock()?;
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<HarvestSession>> {
        Ok(self.lock()?.sessions.get(&id).cloned())
    }

    async fn find_session_by_token(&self, job_token: &str) -> Result<Option<HarvestSession>> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .find(|s| s.job_token.as_deref() == Some(job_token))
            .cloned())
    }

    async fn apply_transition(&self, id: Uuid, transition: SessionTransition) -> Result<TransitionOutcome> {
        let mut state = self.lock()?;
        let current = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })?;

        match transition.apply(current, chrono::Utc::now().into()) {
            Ok(next) => {
                *current = next.clone();
                Ok(TransitionOutcome::Applied(next))
            }
            Err(AppError::InvalidTransition { .. }) => Ok(TransitionOutcome::Rejected {
                current: current.status(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn update_counters(&self, id: Uuid, counters: SessionCounters) -> Result<()> {
        let mut state = self.lock()?;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })?;
        session.set_counters(&counters);
        Ok(())
    }

    async fn list_sessions(
        &self,
        profile_id: Uuid,
        status: Option<HarvestStatus>,
    ) -> Result<Vec<HarvestSession>> {
        let mut sessions: Vec<HarvestSession> = self
            .lock()?
            .sessions
            .values()
            .filter(|s| s.profile_id == profile_id)
            .filter(|s| status.map_or(true, |st| s.status() == st))
            .cloned()
            .collect();

        sessions.sort_by(|a, b| {
            b.completed_at
                .cmp(&a.completed_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(sessions)
    }
}
