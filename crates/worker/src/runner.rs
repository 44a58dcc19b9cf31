//! Harvest job execution
//!
//! Drives one harvest: start the session, page through the provider,
//! normalize and persist each record, then close the session.

use crate::aggregator::{AggregationOutcome, PageAggregator};
use crate::normalizer::RecordNormalizer;
use crate::provider::{SearchProvider, SearchQuery};
use harvest_common::config::WorkerConfig;
use harvest_common::harvest::{
    HarvestStatus, RawPaper, SessionCounters, SessionTransition, TransitionOutcome,
};
use harvest_common::metrics::JobMetrics;
use harvest_common::{HarvestJobMessage, PersistenceGateway, Result, SessionStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Flush session counters every N records
    pub progress_interval: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            progress_interval: 10,
        }
    }
}

impl From<&WorkerConfig> for RunnerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            progress_interval: config.progress_interval,
        }
    }
}

/// Structured result of one harvest; the runner never fails past this
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub job_token: String,
    pub session_id: Option<Uuid>,
    pub status: HarvestStatus,
    /// Raw records returned by the provider
    pub papers_processed: usize,
    pub papers_saved: usize,
    /// Records dropped by the normalizer
    pub skipped: usize,
    pub errors_count: usize,
    pub error: Option<String>,
}

/// How the session is handled for this run
enum Tracking {
    Session(Uuid),
    Untracked,
    /// Already finished (or revoked) before the job started
    Skip(HarvestStatus),
}

pub struct JobRunner {
    provider: Arc<dyn SearchProvider>,
    papers: Arc<dyn PersistenceGateway>,
    sessions: Arc<dyn SessionStore>,
    normalizer: RecordNormalizer,
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        papers: Arc<dyn PersistenceGateway>,
        sessions: Arc<dyn SessionStore>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            provider,
            papers,
            sessions,
            normalizer: RecordNormalizer::new(),
            config,
        }
    }

    /// Execute a harvest job
    #[instrument(skip(self, job), fields(job_token = %job.job_token, session_id = ?job.session_id))]
    pub async fn run(&self, job: &HarvestJobMessage) -> JobOutcome {
        let metrics = JobMetrics::start();
        let mut outcome = JobOutcome {
            job_token: job.job_token.clone(),
            session_id: job.session_id,
            status: HarvestStatus::Running,
            papers_processed: 0,
            papers_saved: 0,
            skipped: 0,
            errors_count: 0,
            error: None,
        };

        let tracking = self.start_session(job).await;
        if let Tracking::Skip(current) = tracking {
            info!(status = %current, "Session already settled, not re-running");
            outcome.status = current;
            metrics.finish(current.as_str(), 0, 0, 0);
            return outcome;
        }

        info!(query = %job.request.query, limit = job.request.limit, "Starting harvest");

        let query = SearchQuery::from(&job.request);
        let aggregation = PageAggregator::new(self.provider.as_ref())
            .collect(&query, job.request.limit)
            .await;

        let mut counters = SessionCounters::default();

        let records = match aggregation {
            AggregationOutcome::FatalNoResultsError(e) => {
                error!(error = %e, "Harvest failed, provider unavailable");
                outcome.error = Some(format!("Search provider failed: {}", e));
                Vec::new()
            }
            AggregationOutcome::PartialResultsDueToProviderError { records, error } => {
                warn!(error = %error, collected = records.len(), "Pagination stopped early");
                records
            }
            AggregationOutcome::Complete(records) => records,
        };

        outcome.papers_processed = records.len();
        counters.papers_found = saturating_i32(records.len());
        self.flush_progress(&tracking, counters).await;

        let context = job.context();
        let interval = self.config.progress_interval.max(1);

        for (index, raw) in records.iter().enumerate() {
            match self.normalizer.normalize(raw, &context) {
                None => {
                    outcome.skipped += 1;
                    debug!(index, "Skipping record without id or title");
                }
                Some(paper) => match self.persist(&paper).await {
                    Ok(created) => {
                        outcome.papers_saved += 1;
                        debug!(external_id = %paper.external_id, created, "Saved paper");
                    }
                    Err(e) => {
                        outcome.errors_count += 1;
                        error!(external_id = %paper.external_id, error = %e, "Failed to save paper");
                    }
                },
            }

            counters.papers_saved = saturating_i32(outcome.papers_saved);
            counters.errors_count = saturating_i32(outcome.errors_count);

            if (index + 1) % interval == 0 {
                self.flush_progress(&tracking, counters).await;
            }
        }

        let transition = match &outcome.error {
            Some(message) => {
                outcome.errors_count += 1;
                SessionTransition::Fail {
                    counters,
                    error: message.clone(),
                }
            }
            None => SessionTransition::Succeed { counters },
        };

        outcome.status = self.finish_session(&tracking, transition).await;

        info!(
            status = %outcome.status,
            processed = outcome.papers_processed,
            saved = outcome.papers_saved,
            skipped = outcome.skipped,
            errors = outcome.errors_count,
            "Harvest finished"
        );

        metrics.finish(
            outcome.status.as_str(),
            outcome.papers_saved as u64,
            outcome.skipped as u64,
            outcome.errors_count as u64,
        );

        outcome
    }

    /// Upsert the paper and its authors, then replace the paper's author set
    async fn persist(&self, paper: &RawPaper) -> Result<bool> {
        let (stored, created) = self
            .papers
            .upsert_paper(&paper.external_id, &paper.fields, &paper.context)
            .await?;

        let mut author_ids = Vec::with_capacity(paper.authors.len());
        for author in &paper.authors {
            let (stored_author, _) = self
                .papers
                .upsert_author(&author.external_id, &author.fields)
                .await?;
            author_ids.push(stored_author.id);
        }

        self.papers.set_paper_authors(stored.id, &author_ids).await?;
        Ok(created)
    }

    async fn start_session(&self, job: &HarvestJobMessage) -> Tracking {
        let Some(session_id) = job.session_id else {
            return Tracking::Untracked;
        };

        let start = SessionTransition::Start {
            job_token: job.job_token.clone(),
        };

        match self.sessions.apply_transition(session_id, start).await {
            Ok(TransitionOutcome::Applied(_)) => Tracking::Session(session_id),
            Ok(TransitionOutcome::Rejected { current }) if current.is_terminal() => {
                Tracking::Skip(current)
            }
            Ok(TransitionOutcome::Rejected { current }) => {
                // Redelivered while a previous attempt left it running
                warn!(status = %current, "Session not pending, continuing");
                Tracking::Session(session_id)
            }
            Err(e) => {
                warn!(error = %e, "Session unavailable, harvesting without bookkeeping");
                Tracking::Untracked
            }
        }
    }

    async fn flush_progress(&self, tracking: &Tracking, counters: SessionCounters) {
        if let Tracking::Session(id) = tracking {
            if let Err(e) = self.sessions.update_counters(*id, counters).await {
                warn!(error = %e, "Failed to update session progress");
            }
        }
    }

    async fn finish_session(&self, tracking: &Tracking, transition: SessionTransition) -> HarvestStatus {
        let target = transition.target();
        let Tracking::Session(id) = tracking else {
            return target;
        };

        match self.sessions.apply_transition(*id, transition).await {
            Ok(TransitionOutcome::Applied(_)) => target,
            Ok(TransitionOutcome::Rejected { current }) => {
                warn!(status = %current, target = %target, "Session changed externally, leaving it");
                current
            }
            Err(e) => {
                warn!(error = %e, "Failed to close session");
                target
            }
        }
    }
}

fn saturating_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, ScriptedProvider};
    use chrono::Utc;
    use harvest_common::db::models::HarvestSession;
    use harvest_common::{HarvestRequest, MemoryStore};
    use serde_json::{json, Value};

    fn record(id: &str) -> Value {
        json!({
            "paperId": id,
            "title": format!("Paper {}", id),
            "authors": [{"authorId": format!("a-{}", id), "name": "Ada Lovelace"}]
        })
    }

    async fn pending_job(store: &MemoryStore, limit: u32) -> HarvestJobMessage {
        let mut request = HarvestRequest::new(Uuid::new_v4(), "graph neural networks");
        request.limit = limit;
        let token = Uuid::new_v4().to_string();
        let session = HarvestSession::pending(&request, token.clone(), Utc::now().into());
        let session = store.create_session(session).await.unwrap();
        HarvestJobMessage {
            job_token: token,
            session_id: Some(session.id),
            request,
        }
    }

    fn runner(provider: ScriptedProvider, store: Arc<MemoryStore>, interval: usize) -> JobRunner {
        JobRunner::new(
            Arc::new(provider),
            store.clone(),
            store,
            RunnerConfig {
                progress_interval: interval,
            },
        )
    }

    #[tokio::test]
    async fn test_successful_run_closes_session() {
        let store = Arc::new(MemoryStore::new());
        let job = pending_job(&store, 10).await;
        let provider = ScriptedProvider::with_pages(vec![vec![record("p1"), record("p2")]], 2);

        let outcome = runner(provider, store.clone(), 10).run(&job).await;

        assert_eq!(outcome.status, HarvestStatus::Success);
        assert_eq!(outcome.papers_processed, 2);
        assert_eq!(outcome.papers_saved, 2);
        assert_eq!(store.author_count(), 2);

        let session = store.find_session(job.session_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(session.status(), HarvestStatus::Success);
        assert_eq!(session.papers_found, 2);
        assert_eq!(session.papers_saved, 2);
        assert_eq!(session.job_token.as_deref(), Some(job.job_token.as_str()));
        assert!(session.started_at.is_some());
        assert!(session.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_papers_carry_session_context() {
        let store = Arc::new(MemoryStore::new());
        let job = pending_job(&store, 10).await;
        let provider = ScriptedProvider::with_pages(vec![vec![record("p1")]], 1);

        runner(provider, store.clone(), 10).run(&job).await;

        let paper = store.paper("p1").unwrap();
        assert_eq!(paper.profile_id, job.request.profile_id);
        assert_eq!(paper.session_id, job.session_id);
        assert_eq!(store.paper_author_ids(paper.id), vec!["a-p1".to_string()]);
    }

    #[tokio::test]
    async fn test_fatal_provider_error_fails_session() {
        let store = Arc::new(MemoryStore::new());
        let job = pending_job(&store, 10).await;
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Status {
            status: 400,
            body: "bad query".into(),
        })]);

        let outcome = runner(provider, store.clone(), 10).run(&job).await;

        assert_eq!(outcome.status, HarvestStatus::Failure);
        assert_eq!(outcome.errors_count, 1);
        assert!(outcome.error.as_deref().unwrap_or_default().contains("400"));

        let session = store.find_session(job.session_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(session.status(), HarvestStatus::Failure);
        assert_eq!(session.errors_count, 1);
        assert!(session.error_message.is_some());
    }

    #[tokio::test]
    async fn test_partial_results_still_succeed() {
        let store = Arc::new(MemoryStore::new());
        let job = pending_job(&store, 10).await;
        let provider = ScriptedProvider::new(vec![
            Ok(crate::provider::SearchPage {
                records: vec![record("p1"), record("p2")],
                total: 10,
            }),
            Err(ProviderError::Network("reset".into())),
        ]);

        let outcome = runner(provider, store.clone(), 10).run(&job).await;

        assert_eq!(outcome.status, HarvestStatus::Success);
        assert_eq!(outcome.papers_saved, 2);
        assert_eq!(outcome.errors_count, 0);
    }

    #[tokio::test]
    async fn test_rerun_upserts_instead_of_duplicating() {
        let store = Arc::new(MemoryStore::new());

        let first = pending_job(&store, 10).await;
        runner(
            ScriptedProvider::with_pages(vec![vec![record("p1")]], 1),
            store.clone(),
            10,
        )
        .run(&first)
        .await;

        let second = pending_job(&store, 10).await;
        let mut changed = record("p1");
        changed["title"] = json!("Paper p1, revised");
        runner(ScriptedProvider::with_pages(vec![vec![changed]], 1), store.clone(), 10)
            .run(&second)
            .await;

        assert_eq!(store.paper_count(), 1);
        assert_eq!(store.paper("p1").unwrap().title, "Paper p1, revised");
    }

    #[tokio::test]
    async fn test_job_without_session_runs_untracked() {
        let store = Arc::new(MemoryStore::new());
        let job = HarvestJobMessage {
            job_token: "adhoc".into(),
            session_id: None,
            request: HarvestRequest::new(Uuid::new_v4(), "graph neural networks"),
        };
        let provider = ScriptedProvider::with_pages(vec![vec![record("p1")]], 1);

        let outcome = runner(provider, store.clone(), 1).run(&job).await;

        assert_eq!(outcome.status, HarvestStatus::Success);
        assert_eq!(store.paper_count(), 1);
    }

    #[tokio::test]
    async fn test_progress_flushed_mid_run() {
        let store = Arc::new(MemoryStore::new());
        let job = pending_job(&store, 10).await;
        let records: Vec<Value> = (0..5).map(|i| record(&format!("p{}", i))).collect();
        let provider = ScriptedProvider::with_pages(vec![records], 5);

        // Interval of 2 exercises the periodic flush; the final transition writes the rest
        let outcome = runner(provider, store.clone(), 2).run(&job).await;

        assert_eq!(outcome.papers_saved, 5);
        let session = store.find_session(job.session_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(session.papers_saved, 5);
        assert_eq!(session.papers_found, 5);
    }
}
