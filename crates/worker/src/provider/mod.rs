//! Bibliographic search provider
//!
//! The [`SearchProvider`] trait is the seam between the pipeline and the
//! outside world. Records cross it as loosely typed JSON and are turned into
//! strongly typed values by the normalizer right after.

mod client;
mod clock;
mod mock;

pub use client::{RateLimitedClient, AUTHOR_FIELDS, DETAIL_FIELDS, PROVIDER_PAGE_MAX, SEARCH_FIELDS};
pub use clock::{Clock, ManualClock, TokioClock};
pub use mock::ScriptedProvider;

use async_trait::async_trait;
use harvest_common::HarvestRequest;
use serde_json::Value;
use thiserror::Error;

/// Query and filters sent to the provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub fields_of_study: Vec<String>,
    pub publication_types: Vec<String>,
    pub min_citation_count: Option<i32>,
    pub open_access_only: bool,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Provider `year` filter: `from-to`, `from-` or `-to`
    pub fn year_param(&self) -> Option<String> {
        match (self.year_from, self.year_to) {
            (Some(from), Some(to)) => Some(format!("{}-{}", from, to)),
            (Some(from), None) => Some(format!("{}-", from)),
            (None, Some(to)) => Some(format!("-{}", to)),
            (None, None) => None,
        }
    }
}

impl From<&HarvestRequest> for SearchQuery {
    fn from(request: &HarvestRequest) -> Self {
        Self {
            query: request.query.clone(),
            year_from: request.year_from,
            year_to: request.year_to,
            fields_of_study: request.fields_of_study.clone(),
            publication_types: request.publication_types.clone(),
            min_citation_count: request.min_citation_count,
            open_access_only: request.open_access_only,
        }
    }
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub records: Vec<Value>,
    /// Total matches reported by the provider, 0 when absent
    pub total: u64,
}

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("rate limit exceeded")]
    RateLimited,

    #[error("transient server error (HTTP {status})")]
    Transient { status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("still rate limited after {attempts} cooldowns")]
    RateLimitRetriesExhausted { attempts: u32 },

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Worth retrying with the same request
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited
                | ProviderError::Transient { .. }
                | ProviderError::Network(_)
                | ProviderError::Timeout
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search at `offset`, asking for at most `limit` records
    async fn search(&self, query: &SearchQuery, offset: u32, limit: u32) -> Result<SearchPage, ProviderError>;

    /// Full record for one provider id
    async fn fetch_record(&self, record_id: &str) -> Result<Value, ProviderError>;

    /// Largest page the provider serves
    fn page_size_max(&self) -> u32 {
        PROVIDER_PAGE_MAX
    }
}
