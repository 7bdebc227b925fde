use std::time::Duration;

use tracing::trace;

/// Capability the watcher reports poll activity against. Implementations
/// bridge to whatever sink the embedding application runs; the watcher
/// works without one.
pub trait MetricRecorder: Send + Sync + 'static {
    fn increment(&self, counter: &str);
    fn observe(&self, name: &str, elapsed: Duration);
}

/// Recorder that forwards counters and timings to `tracing` at trace
/// level under the `metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl MetricRecorder for TracingRecorder {
    fn increment(&self, counter: &str) {
        trace!(target: "metrics", counter, "incr");
    }

    fn observe(&self, name: &str, elapsed: Duration) {
        trace!(target: "metrics", name, elapsed_ms = elapsed.as_millis() as u64, "observe");
    }
}
