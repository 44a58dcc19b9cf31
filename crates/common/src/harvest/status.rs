//! Harvest session lifecycle
//!
//! `Pending -> Running -> {Success, Failure}` is driven by the worker.
//! `Retry` and `Revoked` are written by outside schedulers; the worker only
//! has to tolerate them. Every transition is checked against
//! [`HarvestStatus::can_transition_to`], so a terminal session never moves again.

use crate::db::models::HarvestSession;
use crate::errors::{AppError, Result};
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Session status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarvestStatus {
    Pending,
    Running,
    Success,
    Failure,
    Retry,
    Revoked,
}

impl HarvestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarvestStatus::Pending => "PENDING",
            HarvestStatus::Running => "RUNNING",
            HarvestStatus::Success => "SUCCESS",
            HarvestStatus::Failure => "FAILURE",
            HarvestStatus::Retry => "RETRY",
            HarvestStatus::Revoked => "REVOKED",
        }
    }

    /// No further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HarvestStatus::Success | HarvestStatus::Failure | HarvestStatus::Revoked
        )
    }

    pub fn can_transition_to(&self, next: HarvestStatus) -> bool {
        use HarvestStatus::*;
        matches!(
            (self, next),
            (Pending, Running | Retry | Revoked | Failure)
                | (Running, Success | Failure | Retry | Revoked)
                | (Retry, Running | Failure | Revoked)
        )
    }
}

impl fmt::Display for HarvestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HarvestStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(HarvestStatus::Pending),
            "RUNNING" => Ok(HarvestStatus::Running),
            "SUCCESS" => Ok(HarvestStatus::Success),
            "FAILURE" => Ok(HarvestStatus::Failure),
            "RETRY" => Ok(HarvestStatus::Retry),
            "REVOKED" => Ok(HarvestStatus::Revoked),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown harvest status '{}'", other),
            }),
        }
    }
}

/// Progress counters carried by a session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub papers_found: i32,
    pub papers_saved: i32,
    pub errors_count: i32,
}

/// A requested change to a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionTransition {
    /// The worker picked the job up
    Start { job_token: String },
    /// Aggregation and persistence completed
    Succeed { counters: SessionCounters },
    /// An unrecoverable error ended the harvest
    Fail { counters: SessionCounters, error: String },
    /// Written by an outside scheduler (`Retry` or `Revoked`)
    External(HarvestStatus),
}

/// Result of a compare-and-set transition
#[derive(Clone, Debug, PartialEq)]
pub enum TransitionOutcome {
    Applied(HarvestSession),
    /// The stored status did not allow the transition; nothing was written
    Rejected { current: HarvestStatus },
}

impl SessionTransition {
    pub fn target(&self) -> HarvestStatus {
        match self {
            SessionTransition::Start { .. } => HarvestStatus::Running,
            SessionTransition::Succeed { .. } => HarvestStatus::Success,
            SessionTransition::Fail { .. } => HarvestStatus::Failure,
            SessionTransition::External(status) => *status,
        }
    }

    /// Compute the session after this transition without touching storage
    pub fn apply(&self, session: &HarvestSession, now: DateTimeWithTimeZone) -> Result<HarvestSession> {
        let from = session.status();
        let to = self.target();

        let external_ok = match self {
            SessionTransition::External(status) => {
                matches!(status, HarvestStatus::Retry | HarvestStatus::Revoked)
            }
            _ => true,
        };

        if !external_ok || !from.can_transition_to(to) {
            return Err(AppError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let mut next = session.clone();
        next.status = to.as_str().to_string();

        match self {
            SessionTransition::Start { job_token } => {
                next.started_at = Some(now);
                next.job_token = Some(job_token.clone());
            }
            SessionTransition::Succeed { counters } => {
                next.set_counters(counters);
                next.completed_at = Some(now);
            }
            SessionTransition::Fail { counters, error } => {
                next.set_counters(counters);
                next.errors_count = counters.errors_count + 1;
                next.error_message = Some(error.clone());
                next.completed_at = Some(now);
            }
            SessionTransition::External(_) => {}
        }

        Ok(next)
    }
}
