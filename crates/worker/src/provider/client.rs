//! Rate-limited client for the Semantic Scholar Graph API
//!
//! Every outbound call goes through one lock, so calls are serialized and the
//! configured delay is measured from the end of the previous call. Rate-limit
//! responses trigger a cooldown and a retry of the same request; transient
//! server errors are retried with exponential backoff.

use super::clock::{Clock, TokioClock};
use super::{ProviderError, SearchPage, SearchProvider, SearchQuery};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use harvest_common::config::ProviderConfig;
use harvest_common::metrics::{record_provider_request, record_provider_retry};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// The provider never serves more than this per page
pub const PROVIDER_PAGE_MAX: u32 = 100;

pub const SEARCH_FIELDS: &str = "paperId,title,abstract,year,venue,authors,citationCount,referenceCount,influentialCitationCount,isOpenAccess,openAccessPdf,externalIds";

pub const DETAIL_FIELDS: &str = "paperId,title,abstract,year,venue,authors,citationCount,referenceCount,influentialCitationCount,isOpenAccess,openAccessPdf,externalIds,citations,references";

pub const AUTHOR_FIELDS: &str = "authorId,name,affiliations,homepage,paperCount,citationCount,hIndex";

const RETRYABLE_STATUSES: &[u16] = &[500, 502, 503, 504];

pub struct RateLimitedClient {
    http: Client,
    config: ProviderConfig,
    clock: Arc<dyn Clock>,
    /// End of the most recent outbound call; held for the whole call
    last_call: Mutex<Option<Instant>>,
}

impl RateLimitedClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    pub fn with_clock(config: ProviderConfig, clock: Arc<dyn Clock>) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            config,
            clock,
            last_call: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Query string for a search page
    pub fn search_params(&self, query: &SearchQuery, offset: u32, limit: u32) -> Vec<(&'static str, String)> {
        let page_size = limit.min(self.page_size_max());

        let mut params = vec![
            ("query", query.query.clone()),
            ("limit", page_size.to_string()),
            ("offset", offset.to_string()),
            ("fields", SEARCH_FIELDS.to_string()),
        ];

        if let Some(year) = query.year_param() {
            params.push(("year", year));
        }
        if !query.fields_of_study.is_empty() {
            params.push(("fieldsOfStudy", query.fields_of_study.join(",")));
        }
        if !query.publication_types.is_empty() {
            params.push(("publicationTypes", query.publication_types.join(",")));
        }
        if let Some(min) = query.min_citation_count {
            params.push(("minCitationCount", min.to_string()));
        }
        if query.open_access_only {
            params.push(("openAccessPdf", String::new()));
        }

        params
    }

    fn transient_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.backoff_initial_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(Duration::from_secs(self.config.backoff_max_secs))
            .with_max_elapsed_time(None)
            .build()
    }

    /// GET with rate-limit cooldowns and transient-error backoff
    async fn get_json(&self, endpoint: &str, path: &str, params: &[(&str, String)]) -> Result<Value, ProviderError> {
        let mut backoff = self.transient_backoff();
        let mut cooldowns = 0u32;
        let mut failures = 0u32;

        loop {
            let err = match self.paced_get(endpoint, path, params).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err {
                ProviderError::RateLimited => {
                    cooldowns += 1;
                    let max = self.config.max_rate_limit_retries;
                    if max > 0 && cooldowns > max {
                        return Err(ProviderError::RateLimitRetriesExhausted { attempts: max });
                    }
                    let cooldown = self.config.rate_limit_cooldown();
                    warn!(endpoint, cooldowns, wait_secs = cooldown.as_secs(), "Rate limited, cooling down");
                    record_provider_retry("rate_limit");
                    self.clock.sleep(cooldown).await;
                }
                err if err.is_transient() => {
                    failures += 1;
                    if failures > self.config.max_retries {
                        return Err(ProviderError::RetriesExhausted {
                            attempts: failures,
                            last: Box::new(err),
                        });
                    }
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| Duration::from_secs(self.config.backoff_max_secs));
                    warn!(endpoint, attempt = failures, delay_ms = delay.as_millis() as u64, error = %err, "Transient provider error, backing off");
                    record_provider_retry("transient");
                    self.clock.sleep(delay).await;
                }
                err => return Err(err),
            }
        }
    }

    /// One request, started no sooner than `request_delay` after the previous one ended
    async fn paced_get(&self, endpoint: &str, path: &str, params: &[(&str, String)]) -> Result<Value, ProviderError> {
        let mut last_call = self.last_call.lock().await;

        if let Some(ended) = *last_call {
            let since = self.clock.now().saturating_duration_since(ended);
            let delay = self.config.request_delay();
            if since < delay {
                let wait = delay - since;
                debug!(wait_ms = wait.as_millis() as u64, "Pacing provider request");
                self.clock.sleep(wait).await;
            }
        }

        let result = self.send(endpoint, path, params).await;
        *last_call = Some(self.clock.now());
        result
    }

    async fn send(&self, endpoint: &str, path: &str, params: &[(&str, String)]) -> Result<Value, ProviderError> {
        let mut request = self.http.get(self.url(path)).query(params);
        if let Some(ref key) = self.config.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        record_provider_request(endpoint, status.as_u16());

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if RETRYABLE_STATUSES.contains(&status.as_u16()) {
            return Err(ProviderError::Transient {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    /// Author profile by provider id
    #[instrument(skip(self))]
    pub async fn fetch_author(&self, author_id: &str) -> Result<Value, ProviderError> {
        let params = [("fields", AUTHOR_FIELDS.to_string())];
        self.get_json("author", &format!("/author/{}", author_id), &params)
            .await
    }
}

#[async_trait]
impl SearchProvider for RateLimitedClient {
    #[instrument(skip(self, query), fields(query = %query.query))]
    async fn search(&self, query: &SearchQuery, offset: u32, limit: u32) -> Result<SearchPage, ProviderError> {
        let params = self.search_params(query, offset, limit);
        let body = self.get_json("paper/search", "/paper/search", &params).await?;

        let records = match body.get("data") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let total = body.get("total").and_then(Value::as_u64).unwrap_or(0);

        Ok(SearchPage { records, total })
    }

    #[instrument(skip(self))]
    async fn fetch_record(&self, record_id: &str) -> Result<Value, ProviderError> {
        let params = [("fields", DETAIL_FIELDS.to_string())];
        self.get_json("paper", &format!("/paper/{}", record_id), &params)
            .await
    }

    fn page_size_max(&self) -> u32 {
        self.config.page_size_max.clamp(1, PROVIDER_PAGE_MAX)
    }
}
