//! End-to-end harvest runs over the in-memory store

use async_trait::async_trait;
use chrono::Utc;
use harvest_common::db::models::{Author, HarvestSession, Paper};
use harvest_common::harvest::{
    AuthorFields, HarvestContext, HarvestStatus, PaperFields, SessionTransition, TransitionOutcome,
};
use harvest_common::{
    AppError, HarvestJobMessage, HarvestRequest, MemoryStore, PersistenceGateway, Result, SessionStore,
};
use harvest_common::config::ProviderConfig;
use harvest_worker::provider::{ManualClock, ProviderError, ScriptedProvider};
use harvest_worker::{JobRunner, RateLimitedClient, RunnerConfig, SearchPage, SearchProvider, SearchQuery};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn record(id: &str) -> Value {
    json!({
        "paperId": id,
        "title": format!("Paper {}", id),
        "year": 2021,
        "citationCount": 3,
        "authors": [
            {"authorId": format!("{}-a1", id), "name": "Grace Hopper"},
            {"authorId": format!("{}-a2", id), "name": "Alan Turing"}
        ]
    })
}

fn records(ids: &[&str]) -> Vec<Value> {
    ids.iter().map(|id| record(id)).collect()
}

async fn pending_job(store: &MemoryStore, query: &str, limit: u32) -> HarvestJobMessage {
    let mut request = HarvestRequest::new(Uuid::new_v4(), query);
    request.limit = limit;
    let token = Uuid::new_v4().to_string();
    let session = store
        .create_session(HarvestSession::pending(&request, token.clone(), Utc::now().into()))
        .await
        .unwrap();

    HarvestJobMessage {
        job_token: token,
        session_id: Some(session.id),
        request,
    }
}

fn runner(
    provider: Arc<dyn SearchProvider>,
    papers: Arc<dyn PersistenceGateway>,
    sessions: Arc<MemoryStore>,
) -> JobRunner {
    JobRunner::new(provider, papers, sessions, RunnerConfig::default())
}

async fn session_of(store: &MemoryStore, job: &HarvestJobMessage) -> HarvestSession {
    store
        .find_session(job.session_id.unwrap())
        .await
        .unwrap()
        .unwrap()
}

/// Fails paper upserts for one external id, delegates everything else
struct FailingGateway {
    inner: Arc<MemoryStore>,
    fail_on: String,
}

#[async_trait]
impl PersistenceGateway for FailingGateway {
    async fn upsert_paper(
        &self,
        external_id: &str,
        fields: &PaperFields,
        context: &HarvestContext,
    ) -> Result<(Paper, bool)> {
        if external_id == self.fail_on {
            return Err(AppError::Internal {
                message: "connection reset by peer".into(),
            });
        }
        self.inner.upsert_paper(external_id, fields, context).await
    }

    async fn upsert_author(&self, external_id: &str, fields: &AuthorFields) -> Result<(Author, bool)> {
        self.inner.upsert_author(external_id, fields).await
    }

    async fn set_paper_authors(&self, paper_id: Uuid, author_ids: &[Uuid]) -> Result<()> {
        self.inner.set_paper_authors(paper_id, author_ids).await
    }
}

/// Revokes the session when the first page is requested, then delegates
struct RevokingProvider {
    inner: ScriptedProvider,
    sessions: Arc<MemoryStore>,
    session_id: Uuid,
}

#[async_trait]
impl SearchProvider for RevokingProvider {
    async fn search(&self, query: &SearchQuery, offset: u32, limit: u32) -> std::result::Result<SearchPage, ProviderError> {
        if offset == 0 {
            let outcome = self
                .sessions
                .apply_transition(self.session_id, SessionTransition::External(HarvestStatus::Revoked))
                .await
                .unwrap();
            assert!(matches!(outcome, TransitionOutcome::Applied(_)));
        }
        self.inner.search(query, offset, limit).await
    }

    async fn fetch_record(&self, record_id: &str) -> std::result::Result<Value, ProviderError> {
        self.inner.fetch_record(record_id).await
    }
}

#[tokio::test]
async fn test_two_pages_reach_limit() {
    let store = Arc::new(MemoryStore::new());
    let job = pending_job(&store, "machine learning safety", 5).await;
    let provider = Arc::new(ScriptedProvider::with_pages(
        vec![records(&["p1", "p2", "p3"]), records(&["p4", "p5"])],
        5,
    ));

    let outcome = runner(provider.clone(), store.clone(), store.clone())
        .run(&job)
        .await;

    assert_eq!(outcome.status, HarvestStatus::Success);
    assert_eq!(outcome.papers_processed, 5);
    assert_eq!(outcome.papers_saved, 5);
    assert_eq!(provider.calls(), vec![(0, 5), (3, 2)]);

    assert_eq!(store.paper_count(), 5);
    assert_eq!(store.author_count(), 10);
    let p4 = store.paper("p4").unwrap();
    assert_eq!(store.paper_author_ids(p4.id), vec!["p4-a1", "p4-a2"]);

    let session = session_of(&store, &job).await;
    assert_eq!(session.status(), HarvestStatus::Success);
    assert_eq!(session.papers_found, 5);
    assert_eq!(session.papers_saved, 5);
    assert_eq!(session.errors_count, 0);
}

#[tokio::test]
async fn test_record_without_title_is_skipped_not_counted_as_error() {
    let store = Arc::new(MemoryStore::new());
    let job = pending_job(&store, "machine learning safety", 10).await;
    let provider = Arc::new(ScriptedProvider::with_pages(
        vec![vec![
            record("p1"),
            json!({"paperId": "p2", "abstract": "untitled"}),
            record("p3"),
        ]],
        3,
    ));

    let outcome = runner(provider, store.clone(), store.clone()).run(&job).await;

    assert_eq!(outcome.papers_saved, 2);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.errors_count, 0);
    assert!(store.paper("p2").is_none());
}

#[tokio::test]
async fn test_rate_limited_first_call_then_saved() {
    let mut server = mockito::Server::new_async().await;
    let limited = server
        .mock("GET", "/paper/search")
        .match_query(mockito::Matcher::Any)
        .with_status(429)
        .expect(1)
        .create_async()
        .await;
    let ok = server
        .mock("GET", "/paper/search")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"total": 2, "offset": 0, "data": records(&["p1", "p2"])}).to_string())
        .expect(1)
        .create_async()
        .await;

    let clock = Arc::new(ManualClock::new());
    let config = ProviderConfig {
        base_url: server.url(),
        ..Default::default()
    };
    let client = Arc::new(RateLimitedClient::with_clock(config, clock.clone()).unwrap());

    let store = Arc::new(MemoryStore::new());
    let job = pending_job(&store, "machine learning safety", 5).await;

    let outcome = runner(client, store.clone(), store.clone()).run(&job).await;

    limited.assert_async().await;
    ok.assert_async().await;
    assert!(clock.total_slept() >= Duration::from_secs(60));
    assert_eq!(outcome.status, HarvestStatus::Success);
    assert_eq!(outcome.papers_saved, 2);
    assert!(store.paper("p1").is_some());
}

#[tokio::test]
async fn test_persistence_failure_on_one_record_continues() {
    let store = Arc::new(MemoryStore::new());
    let job = pending_job(&store, "machine learning safety", 10).await;
    let provider = Arc::new(ScriptedProvider::with_pages(
        vec![records(&["p1", "p2", "p3", "p4"])],
        4,
    ));
    let gateway = Arc::new(FailingGateway {
        inner: store.clone(),
        fail_on: "p2".into(),
    });

    let outcome = runner(provider, gateway, store.clone()).run(&job).await;

    assert_eq!(outcome.status, HarvestStatus::Success);
    assert_eq!(outcome.errors_count, 1);
    assert_eq!(outcome.papers_saved, 3);

    let session = session_of(&store, &job).await;
    assert_eq!(session.status(), HarvestStatus::Success);
    assert_eq!(session.errors_count, 1);
    assert_eq!(session.papers_saved, 3);
}

#[tokio::test]
async fn test_unreachable_provider_fails_session() {
    let store = Arc::new(MemoryStore::new());
    let job = pending_job(&store, "machine learning safety", 10).await;
    let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::RetriesExhausted {
        attempts: 4,
        last: Box::new(ProviderError::Transient { status: 503 }),
    })]));

    let outcome = runner(provider, store.clone(), store.clone()).run(&job).await;

    assert_eq!(outcome.status, HarvestStatus::Failure);
    assert_eq!(outcome.papers_saved, 0);
    assert_eq!(outcome.errors_count, 1);

    let session = session_of(&store, &job).await;
    assert_eq!(session.status(), HarvestStatus::Failure);
    assert_eq!(session.errors_count, 1);
    assert!(session.completed_at.is_some());
    assert!(session
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("503"));
}

#[tokio::test]
async fn test_revoked_session_is_not_run() {
    let store = Arc::new(MemoryStore::new());
    let job = pending_job(&store, "machine learning safety", 10).await;
    let revoked = store
        .apply_transition(job.session_id.unwrap(), SessionTransition::External(HarvestStatus::Revoked))
        .await
        .unwrap();
    assert!(matches!(revoked, TransitionOutcome::Applied(_)));

    let provider = Arc::new(ScriptedProvider::with_pages(vec![records(&["p1"])], 1));
    let outcome = runner(provider.clone(), store.clone(), store.clone())
        .run(&job)
        .await;

    assert_eq!(outcome.status, HarvestStatus::Revoked);
    assert!(provider.calls().is_empty());
    assert_eq!(store.paper_count(), 0);
    assert_eq!(session_of(&store, &job).await.status(), HarvestStatus::Revoked);
}

#[tokio::test]
async fn test_deleted_session_still_harvests() {
    let store = Arc::new(MemoryStore::new());
    let job = pending_job(&store, "machine learning safety", 10).await;
    assert!(store.delete_session(job.session_id.unwrap()));

    let provider = Arc::new(ScriptedProvider::with_pages(vec![records(&["p1", "p2"])], 2));
    let outcome = runner(provider, store.clone(), store.clone()).run(&job).await;

    assert_eq!(outcome.status, HarvestStatus::Success);
    assert_eq!(outcome.papers_saved, 2);
    assert_eq!(store.paper_count(), 2);
}

#[tokio::test]
async fn test_revoked_while_running_stays_revoked() {
    let store = Arc::new(MemoryStore::new());
    let job = pending_job(&store, "machine learning safety", 10).await;
    let provider = Arc::new(RevokingProvider {
        inner: ScriptedProvider::with_pages(vec![records(&["p1", "p2"])], 2),
        sessions: store.clone(),
        session_id: job.session_id.unwrap(),
    });

    let outcome = runner(provider, store.clone(), store.clone()).run(&job).await;

    assert_eq!(outcome.status, HarvestStatus::Revoked);
    // Records collected before the revocation was seen are still kept
    assert_eq!(store.paper_count(), 2);

    let session = session_of(&store, &job).await;
    assert_eq!(session.status(), HarvestStatus::Revoked);
    assert!(session.completed_at.is_none());
    assert_eq!(session.papers_saved, 0);
}
