//! Scholar Harvest Worker
//!
//! The harvest pipeline:
//! 1. `provider`: rate-limited client for the bibliographic search API
//! 2. `aggregator`: pagination up to the requested limit
//! 3. `normalizer`: raw JSON records into typed papers and authors
//! 4. `runner`: one harvest job end to end, with session bookkeeping
//! 5. `worker`: the queue polling loop

pub mod aggregator;
pub mod normalizer;
pub mod provider;
pub mod runner;
pub mod worker;

pub use aggregator::{AggregationOutcome, PageAggregator};
pub use normalizer::RecordNormalizer;
pub use provider::{ProviderError, RateLimitedClient, SearchPage, SearchProvider, SearchQuery};
pub use runner::{JobOutcome, JobRunner, RunnerConfig};
pub use worker::{BatchReport, QueueWorker};
