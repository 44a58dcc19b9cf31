//! Metrics and observability utilities
//!
//! Prometheus metrics for the harvest pipeline with standardized naming.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all harvest metrics
pub const METRICS_PREFIX: &str = "harvest";

/// Histogram buckets for whole-harvest duration (in seconds).
/// A harvest is paced at one provider call every few seconds.
pub const HARVEST_DURATION_BUCKETS: &[f64] = &[
    1.0,    // 1s
    5.0,    // 5s
    15.0,   // 15s
    30.0,   // 30s
    60.0,   // 1m
    120.0,  // 2m
    300.0,  // 5m
    600.0,  // 10m
    1800.0, // 30m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Job metrics
    describe_counter!(
        format!("{}_jobs_total", METRICS_PREFIX),
        Unit::Count,
        "Total harvest jobs finished, by final status"
    );

    describe_histogram!(
        format!("{}_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Wall-clock duration of a harvest job"
    );

    // Record metrics
    describe_counter!(
        format!("{}_papers_saved_total", METRICS_PREFIX),
        Unit::Count,
        "Total papers upserted"
    );

    describe_counter!(
        format!("{}_records_skipped_total", METRICS_PREFIX),
        Unit::Count,
        "Provider records dropped by the normalizer"
    );

    describe_counter!(
        format!("{}_record_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Records that failed to persist"
    );

    // Provider metrics
    describe_counter!(
        format!("{}_provider_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Provider API requests, by endpoint and HTTP status"
    );

    describe_counter!(
        format!("{}_provider_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Provider request retries, by reason"
    );

    // Queue metrics
    describe_counter!(
        format!("{}_queue_messages_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Total queue messages processed"
    );

    tracing::info!("Metrics registered");
}

/// Tracks one harvest from start to completion
pub struct JobMetrics {
    start: Instant,
}

impl JobMetrics {
    /// Start tracking a harvest
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record harvest completion with its final status
    pub fn finish(self, status: &str, papers_saved: u64, skipped: u64, errors: u64) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_jobs_total", METRICS_PREFIX),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(format!("{}_duration_seconds", METRICS_PREFIX)).record(duration);

        counter!(format!("{}_papers_saved_total", METRICS_PREFIX)).increment(papers_saved);
        counter!(format!("{}_records_skipped_total", METRICS_PREFIX)).increment(skipped);
        counter!(format!("{}_record_errors_total", METRICS_PREFIX)).increment(errors);
    }
}

/// Helper to record a provider round trip
pub fn record_provider_request(endpoint: &str, status: u16) {
    counter!(
        format!("{}_provider_requests_total", METRICS_PREFIX),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Helper to record a provider retry (`rate_limit`, `transient`)
pub fn record_provider_retry(reason: &str) {
    counter!(
        format!("{}_provider_retries_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Helper to record queue message handling
pub fn record_queue_message(result: &str) {
    counter!(
        format!("{}_queue_messages_processed_total", METRICS_PREFIX),
        "result" => result.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_buckets() {
        let mut prev = 0.0;
        for &bucket in HARVEST_DURATION_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_job_metrics() {
        let metrics = JobMetrics::start();
        metrics.finish("success", 3, 1, 0);
        record_provider_request("paper/search", 200);
        record_provider_retry("rate_limit");
        // No recorder installed, just verify it runs without panic
    }
}
