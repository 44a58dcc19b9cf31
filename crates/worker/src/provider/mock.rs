//! Scripted in-process provider for tests and local runs

use super::{ProviderError, SearchPage, SearchProvider, SearchQuery, PROVIDER_PAGE_MAX};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays a fixed sequence of search responses
///
/// Each `search` call consumes the next scripted response; once the script
/// runs out every call returns an empty page. Calls are recorded as
/// `(offset, limit)` pairs.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<SearchPage, ProviderError>>>,
    calls: Mutex<Vec<(u32, u32)>>,
    page_size_max: u32,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<SearchPage, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            page_size_max: PROVIDER_PAGE_MAX,
        }
    }

    /// Serve `pages` in order, each reporting `total` available matches
    pub fn with_pages(pages: Vec<Vec<Value>>, total: u64) -> Self {
        Self::new(
            pages
                .into_iter()
                .map(|records| Ok(SearchPage { records, total }))
                .collect(),
        )
    }

    pub fn with_page_size_max(mut self, page_size_max: u32) -> Self {
        self.page_size_max = page_size_max;
        self
    }

    pub fn calls(&self) -> Vec<(u32, u32)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for ScriptedProvider {
    async fn search(&self, _query: &SearchQuery, offset: u32, limit: u32) -> Result<SearchPage, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((offset, limit));
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Ok(mut page)) => {
                page.records.truncate(limit as usize);
                Ok(page)
            }
            Some(Err(e)) => Err(e),
            None => Ok(SearchPage::default()),
        }
    }

    async fn fetch_record(&self, record_id: &str) -> Result<Value, ProviderError> {
        Err(ProviderError::Status {
            status: 404,
            body: format!("no scripted record {}", record_id),
        })
    }

    fn page_size_max(&self) -> u32 {
        self.page_size_max
    }
}
