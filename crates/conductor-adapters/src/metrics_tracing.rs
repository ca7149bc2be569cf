//! `MetricsSink` that emits structured tracing events. The vendor metrics
//! backend itself is out of scope; this keeps the orchestrator's counters
//! and timings visible in logs without pulling in a vendor client.

use std::time::Duration;

use conductor_core::ports::MetricsSink;
use tracing::info;

#[derive(Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn count(&self, name: &str, tags: &[(&str, &str)]) {
        info!(metric = name, tags = ?tags, "count");
    }

    fn timing(&self, name: &str, duration: Duration, tags: &[(&str, &str)]) {
        info!(metric = name, duration_ms = duration.as_millis() as u64, tags = ?tags, "timing");
    }
}
