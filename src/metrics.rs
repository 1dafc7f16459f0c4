/// Metrics sink injected into the service at construction. Components never
/// touch a process-wide registry directly; tests pass [`NoopMetrics`].
pub trait MetricsSink: Send + Sync {
    fn frame_added(&self, source: &str);
    fn frame_deleted(&self);
    fn frames_purged(&self, count: u64);
    fn operation_failed(&self, operation: &str);
}

/// Sink that discards everything. Default for tests.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn frame_added(&self, _source: &str) {}
    fn frame_deleted(&self) {}
    fn frames_purged(&self, _count: u64) {}
    fn operation_failed(&self, _operation: &str) {}
}

/// Sink that forwards to the `metrics` facade; `main` installs the
/// Prometheus exporter that collects these.
pub struct PrometheusMetrics;

impl MetricsSink for PrometheusMetrics {
    fn frame_added(&self, source: &str) {
        metrics::counter!("forkwatch_frames_added_total", "source" => source.to_string())
            .increment(1);
    }

    fn frame_deleted(&self) {
        metrics::counter!("forkwatch_frames_deleted_total").increment(1);
    }

    fn frames_purged(&self, count: u64) {
        metrics::counter!("forkwatch_frames_purged_total").increment(count);
    }

    fn operation_failed(&self, operation: &str) {
        metrics::counter!("forkwatch_operation_failures_total", "operation" => operation.to_string())
            .increment(1);
    }
}
