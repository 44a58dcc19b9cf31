//! Job submission and status polling
//!
//! The surface the surrounding application calls: submit a request, poll its
//! token, list finished sessions. Submission only validates and dispatches;
//! the outcome of a harvest is visible through [`HarvestService::status`].

use crate::db::models::HarvestSession;
use crate::db::SessionStore;
use crate::errors::{AppError, Result};
use crate::harvest::{
    FilterOptions, HarvestRequest, HarvestStatus, SessionCounters, SessionTransition,
};
use crate::queue::{HarvestJobMessage, JobQueue};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Returned by a successful submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub job_token: String,
    pub session_id: Uuid,
    pub message: String,
    pub parameters: ParametersSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParametersSummary {
    pub query: String,
    pub year_range: String,
    pub limit: u32,
    pub filters_applied: usize,
}

/// Answer to a status poll
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job_token: String,
    /// One of the session statuses, or `UNKNOWN`
    pub status: String,
    /// No further change will happen
    pub ready: bool,
    pub successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<HarvestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestResult {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub counters: SessionCounters,
}

/// A finished session as listed to its owner
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub title: String,
    pub status: HarvestStatus,
    #[serde(flatten)]
    pub counters: SessionCounters,
    pub completed_at: Option<chrono::DateTime<chrono::FixedOffset>>,
}

impl From<&HarvestSession> for SessionSummary {
    fn from(session: &HarvestSession) -> Self {
        Self {
            session_id: session.id,
            title: session.title(),
            status: session.status(),
            counters: session.counters(),
            completed_at: session.completed_at,
        }
    }
}

pub const UNKNOWN_STATUS: &str = "UNKNOWN";

pub struct HarvestService {
    sessions: Arc<dyn SessionStore>,
    queue: Arc<dyn JobQueue>,
}

impl HarvestService {
    pub fn new(sessions: Arc<dyn SessionStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { sessions, queue }
    }

    /// Validate, record a pending session and dispatch the job
    #[instrument(skip(self, request), fields(profile_id = %request.profile_id))]
    pub async fn submit(&self, request: HarvestRequest) -> Result<SubmissionReceipt> {
        let request = request.normalized();
        request.validate()?;

        let job_token = Uuid::new_v4().to_string();
        let session = self
            .sessions
            .create_session(HarvestSession::pending(
                &request,
                job_token.clone(),
                chrono::Utc::now().into(),
            ))
            .await?;

        let message = HarvestJobMessage {
            job_token: job_token.clone(),
            session_id: Some(session.id),
            request: request.clone(),
        };

        // A dispatch failure is reported through the session, not the submission
        let note = match self.queue.enqueue(&message).await {
            Ok(_) => {
                info!(session_id = %session.id, job_token = %job_token, "Harvest job submitted");
                "Harvest started. Poll the job token for progress."
            }
            Err(e) => {
                error!(session_id = %session.id, error = %e, "Failed to dispatch harvest job");
                let fail = SessionTransition::Fail {
                    counters: SessionCounters::default(),
                    error: format!("dispatch failed: {}", e),
                };
                if let Err(mark_err) = self.sessions.apply_transition(session.id, fail).await {
                    error!(session_id = %session.id, error = %mark_err, "Failed to mark session as failed");
                }
                "Harvest could not be started. Poll the job token for details."
            }
        };

        Ok(SubmissionReceipt {
            job_token,
            session_id: session.id,
            message: note.to_string(),
            parameters: ParametersSummary {
                query: request.query.clone(),
                year_range: request.year_range_label(),
                limit: request.limit,
                filters_applied: request.filters_applied(),
            },
        })
    }

    /// Status of a job by its tracking token
    pub async fn status(&self, job_token: &str) -> Result<JobStatusReport> {
        let Some(session) = self.sessions.find_session_by_token(job_token).await? else {
            return Ok(JobStatusReport {
                job_token: job_token.to_string(),
                status: UNKNOWN_STATUS.to_string(),
                ready: true,
                successful: false,
                result: None,
                error: Some("unknown job token".to_string()),
            });
        };

        let status = session.status();
        let (result, error) = match status {
            HarvestStatus::Success => (
                Some(HarvestResult {
                    session_id: session.id,
                    counters: session.counters(),
                }),
                None,
            ),
            HarvestStatus::Failure => (
                None,
                Some(
                    session
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "harvest failed".to_string()),
                ),
            ),
            HarvestStatus::Revoked => (None, Some("harvest was revoked".to_string())),
            _ => (None, None),
        };

        Ok(JobStatusReport {
            job_token: job_token.to_string(),
            status: status.to_string(),
            ready: status.is_terminal(),
            successful: status == HarvestStatus::Success,
            result,
            error,
        })
    }

    /// Successfully completed sessions of a profile, newest first
    pub async fn completed_sessions(&self, profile_id: Uuid) -> Result<Vec<SessionSummary>> {
        let sessions = self
            .sessions
            .list_sessions(profile_id, Some(HarvestStatus::Success))
            .await?;
        Ok(sessions.iter().map(SessionSummary::from).collect())
    }

    /// Session by id, scoped to its owner
    pub async fn session(&self, profile_id: Uuid, session_id: Uuid) -> Result<HarvestSession> {
        self.sessions
            .find_session(session_id)
            .await?
            .filter(|s| s.profile_id == profile_id)
            .ok_or_else(|| AppError::SessionNotFound {
                id: session_id.to_string(),
            })
    }

    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::queue::{LocalQueue, ReceivedJob};
    use async_trait::async_trait;

    struct ClosedQueue;

    #[async_trait]
    impl JobQueue for ClosedQueue {
        async fn enqueue(&self, _message: &HarvestJobMessage) -> Result<String> {
            Err(AppError::QueueError {
                message: "queue offline".into(),
            })
        }

        async fn receive(&self) -> Result<Vec<ReceivedJob>> {
            Ok(Vec::new())
        }

        async fn acknowledge(&self, _receipt: &str) -> Result<()> {
            Ok(())
        }
    }

    fn service() -> (HarvestService, Arc<MemoryStore>, Arc<LocalQueue>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(LocalQueue::new());
        (
            HarvestService::new(store.clone(), queue.clone()),
            store,
            queue,
        )
    }

    #[tokio::test]
    async fn test_submit_creates_pending_session_and_enqueues() {
        let (service, store, queue) = service();
        let mut request = HarvestRequest::new(Uuid::new_v4(), "  machine learning safety ");
        request.year_from = Some(2019);
        request.fields_of_study = vec!["Computer Science".into(), "Computer Science".into()];
        request.open_access_only = true;

        let receipt = service.submit(request).await.unwrap();
        assert_eq!(receipt.parameters.query, "machine learning safety");
        assert_eq!(receipt.parameters.year_range, "2019 - Any");
        assert_eq!(receipt.parameters.filters_applied, 2);

        let session = store.find_session(receipt.session_id).await.unwrap().unwrap();
        assert_eq!(session.status(), HarvestStatus::Pending);
        assert_eq!(session.fields_of_study(), vec!["Computer Science"]);

        let jobs = queue.receive().await.unwrap();
        let message = jobs[0].parse().unwrap();
        assert_eq!(message.job_token, receipt.job_token);
        assert_eq!(message.session_id, Some(receipt.session_id));
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_dispatch() {
        let (service, _, queue) = service();
        let request = HarvestRequest::new(Uuid::new_v4(), "too short");

        let err = service.submit(request).await.unwrap_err();
        assert_eq!(err.field_errors()[0].error_field, "query");
        assert!(queue.receive().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_marks_session_failed() {
        let store = Arc::new(MemoryStore::new());
        let service = HarvestService::new(store.clone(), Arc::new(ClosedQueue));
        let profile = Uuid::new_v4();

        let receipt = service
            .submit(HarvestRequest::new(profile, "ocean carbon uptake"))
            .await
            .unwrap();

        let sessions = store.list_sessions(profile, None).await.unwrap();
        assert_eq!(sessions[0].id, receipt.session_id);
        assert_eq!(sessions[0].status(), HarvestStatus::Failure);

        let report = service.status(&receipt.job_token).await.unwrap();
        assert_eq!(report.status, "FAILURE");
        assert!(report.ready);
        assert!(!report.successful);
        assert!(report.error.unwrap().contains("queue offline"));
    }

    #[tokio::test]
    async fn test_status_reports() {
        let (service, store, _) = service();
        let receipt = service
            .submit(HarvestRequest::new(Uuid::new_v4(), "soft robotics actuators"))
            .await
            .unwrap();

        let pending = service.status(&receipt.job_token).await.unwrap();
        assert_eq!(pending.status, "PENDING");
        assert!(!pending.ready);

        store
            .apply_transition(
                receipt.session_id,
                SessionTransition::Start {
                    job_token: receipt.job_token.clone(),
                },
            )
            .await
            .unwrap();
        let counters = SessionCounters {
            papers_found: 5,
            papers_saved: 5,
            errors_count: 0,
        };
        store
            .apply_transition(receipt.session_id, SessionTransition::Succeed { counters })
            .await
            .unwrap();

        let done = service.status(&receipt.job_token).await.unwrap();
        assert!(done.ready && done.successful);
        assert_eq!(done.result.unwrap().counters, counters);

        let unknown = service.status("no-such-token").await.unwrap();
        assert_eq!(unknown.status, UNKNOWN_STATUS);
        assert!(!unknown.successful);
    }

    #[tokio::test]
    async fn test_completed_sessions_lists_only_successes() {
        let (service, store, _) = service();
        let profile = Uuid::new_v4();

        let first = service
            .submit(HarvestRequest::new(profile, "battery anode materials"))
            .await
            .unwrap();
        service
            .submit(HarvestRequest::new(profile, "solid state electrolytes"))
            .await
            .unwrap();

        for transition in [
            SessionTransition::Start {
                job_token: first.job_token.clone(),
            },
            SessionTransition::Succeed {
                counters: SessionCounters::default(),
            },
        ] {
            store.apply_transition(first.session_id, transition).await.unwrap();
        }

        let listed = service.completed_sessions(profile).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Battery Anode Materials");

        assert!(service.session(Uuid::new_v4(), first.session_id).await.is_err());
    }
}
