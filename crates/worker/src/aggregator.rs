//! Pagination over provider search results

use crate::provider::{ProviderError, SearchProvider, SearchQuery};
use serde_json::Value;
use tracing::{info, instrument, warn};

/// How a collection run ended
#[derive(Debug)]
pub enum AggregationOutcome {
    /// End of results, the limit, or the provider's total was reached
    Complete(Vec<Value>),
    /// A page request failed after some records were collected; they are kept
    PartialResultsDueToProviderError { records: Vec<Value>, error: ProviderError },
    /// The provider failed before returning anything
    FatalNoResultsError(ProviderError),
}

impl AggregationOutcome {
    pub fn records(&self) -> &[Value] {
        match self {
            AggregationOutcome::Complete(records)
            | AggregationOutcome::PartialResultsDueToProviderError { records, .. } => records,
            AggregationOutcome::FatalNoResultsError(_) => &[],
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AggregationOutcome::FatalNoResultsError(_))
    }
}

pub struct PageAggregator<'a> {
    provider: &'a dyn SearchProvider,
}

impl<'a> PageAggregator<'a> {
    pub fn new(provider: &'a dyn SearchProvider) -> Self {
        Self { provider }
    }

    /// Collect at most `total_limit` records in provider order
    #[instrument(skip(self, query), fields(query = %query.query))]
    pub async fn collect(&self, query: &SearchQuery, total_limit: u32) -> AggregationOutcome {
        let limit = total_limit as usize;
        let page_max = self.provider.page_size_max().max(1) as usize;
        let mut records: Vec<Value> = Vec::with_capacity(limit.min(page_max * 4));
        let mut offset: u32 = 0;

        while records.len() < limit {
            let want = page_max.min(limit - records.len()) as u32;

            let page = match self.provider.search(query, offset, want).await {
                Ok(page) => page,
                Err(error) if records.is_empty() => {
                    warn!(offset, error = %error, "Provider failed before any results");
                    return AggregationOutcome::FatalNoResultsError(error);
                }
                Err(error) => {
                    warn!(offset, collected = records.len(), error = %error, "Provider failed mid-pagination, keeping partial results");
                    return AggregationOutcome::PartialResultsDueToProviderError { records, error };
                }
            };

            let page_len = page.records.len();
            if page_len == 0 {
                info!(offset, "Empty page, end of results");
                break;
            }

            info!(offset, page_len, total = page.total, "Fetched page");

            let reached_total = u64::from(offset) + page_len as u64 >= page.total;
            let room = limit - records.len();
            records.extend(page.records.into_iter().take(room));
            offset += page_len as u32;

            if reached_total {
                break;
            }
        }

        AggregationOutcome::Complete(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ScriptedProvider, SearchPage};
    use serde_json::json;

    fn records(ids: std::ops::Range<u32>) -> Vec<Value> {
        ids.map(|i| json!({"paperId": format!("p{}", i), "title": format!("Paper {}", i)}))
            .collect()
    }

    fn ids(values: &[Value]) -> Vec<String> {
        values
            .iter()
            .map(|v| v["paperId"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_two_short_pages_reach_total() {
        let provider = ScriptedProvider::with_pages(vec![records(0..3), records(3..5)], 5);
        let query = SearchQuery::new("machine learning safety");

        let outcome = PageAggregator::new(&provider).collect(&query, 5).await;

        assert!(matches!(outcome, AggregationOutcome::Complete(_)));
        assert_eq!(outcome.records().len(), 5);
        assert_eq!(provider.calls(), vec![(0, 5), (3, 2)]);
    }

    #[tokio::test]
    async fn test_limit_truncates_and_preserves_order() {
        let provider = ScriptedProvider::with_pages(vec![records(0..4), records(4..8)], 100)
            .with_page_size_max(4);

        let outcome = PageAggregator::new(&provider)
            .collect(&SearchQuery::new("a b c"), 6)
            .await;

        assert_eq!(ids(outcome.records()), vec!["p0", "p1", "p2", "p3", "p4", "p5"]);
        assert_eq!(provider.calls(), vec![(0, 4), (4, 2)]);
    }

    #[tokio::test]
    async fn test_empty_page_stops() {
        let provider = ScriptedProvider::with_pages(vec![records(0..2), vec![]], 50);

        let outcome = PageAggregator::new(&provider)
            .collect(&SearchQuery::new("a b c"), 10)
            .await;

        assert_eq!(outcome.records().len(), 2);
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_total_stops_after_first_page() {
        let provider = ScriptedProvider::with_pages(vec![records(0..3), records(3..6)], 0);

        let outcome = PageAggregator::new(&provider)
            .collect(&SearchQuery::new("a b c"), 10)
            .await;

        assert_eq!(outcome.records().len(), 3);
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_error_after_results_keeps_partial() {
        let provider = ScriptedProvider::new(vec![
            Ok(SearchPage {
                records: records(0..3),
                total: 10,
            }),
            Err(ProviderError::Transient { status: 502 }),
        ]);

        let outcome = PageAggregator::new(&provider)
            .collect(&SearchQuery::new("a b c"), 10)
            .await;

        match outcome {
            AggregationOutcome::PartialResultsDueToProviderError { records, error } => {
                assert_eq!(records.len(), 3);
                assert!(matches!(error, ProviderError::Transient { status: 502 }));
            }
            other => panic!("expected partial results, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_on_first_call_is_fatal() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Network("refused".into()))]);

        let outcome = PageAggregator::new(&provider)
            .collect(&SearchQuery::new("a b c"), 10)
            .await;

        assert!(outcome.is_fatal());
        assert!(outcome.records().is_empty());
    }
}
