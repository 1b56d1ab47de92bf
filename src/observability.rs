use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone, PartialEq)]
pub struct EncodeMetricsSnapshot {
    pub backends: BTreeMap<String, BackendMetrics>,
    pub frames_written: u64,
    pub repeated_frames: u64,
    pub retries: u64,
    pub duplicates_discarded: u64,
    pub stale_attempts_discarded: u64,
    pub producer_stalls: u64,
    pub total_duration_ms: f64,
}

#[derive(Debug, Default, Serialize, Clone, PartialEq)]
pub struct BackendMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

/// Per-session metrics. Clones share the same counters.
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<EncodeMetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EncodeMetricsSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Times one compression call; recorded when the timer drops.
    pub fn start_backend(&self, backend: &str) -> BackendTimer {
        BackendTimer {
            backend: backend.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn record_backend_failure(&self, backend: &str) {
        self.lock()
            .backends
            .entry(backend.to_string())
            .or_default()
            .failures += 1;
    }

    pub fn record_retry(&self) {
        self.lock().retries += 1;
    }

    pub fn record_duplicate(&self) {
        self.lock().duplicates_discarded += 1;
    }

    pub fn record_stale_attempt(&self) {
        self.lock().stale_attempts_discarded += 1;
    }

    pub fn record_repeat(&self) {
        self.lock().repeated_frames += 1;
    }

    pub fn record_frames_written(&self, frames: u64) {
        self.lock().frames_written = frames;
    }

    pub fn record_producer_stalls(&self, stalls: u64) {
        self.lock().producer_stalls = stalls;
    }

    pub fn record_total_duration(&self, duration: Duration) {
        self.lock().total_duration_ms = duration.as_secs_f64() * 1_000.0;
    }

    pub fn snapshot(&self) -> EncodeMetricsSnapshot {
        self.lock().clone()
    }

    pub fn reset(&self) {
        *self.lock() = EncodeMetricsSnapshot::default();
    }
}

pub struct BackendTimer {
    backend: String,
    started_at: Instant,
    collector: Arc<Mutex<EncodeMetricsSnapshot>>,
    recorded: bool,
}

impl BackendTimer {
    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        {
            let mut guard = self
                .collector
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let metrics = guard.backends.entry(self.backend.clone()).or_default();
            metrics.calls += 1;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            backend = self.backend.as_str(),
            duration_ms, "Compression call recorded"
        );
        self.recorded = true;
    }
}

impl Drop for BackendTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &EncodeMetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        frames_written = snapshot.frames_written,
        repeated_frames = snapshot.repeated_frames,
        retries = snapshot.retries,
        duplicates_discarded = snapshot.duplicates_discarded,
        stale_attempts_discarded = snapshot.stale_attempts_discarded,
        producer_stalls = snapshot.producer_stalls,
        "Encode metrics summary"
    );
    for (backend, metrics) in &snapshot.backends {
        info!(
            backend = backend.as_str(),
            calls = metrics.calls,
            failures = metrics.failures,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Backend metrics"
        );
    }
}

impl EncodeMetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        let counters = [
            ("frames_written", "Frames appended to the package", self.frames_written),
            (
                "repeated_frames",
                "Frames written as copies of the previous picture",
                self.repeated_frames,
            ),
            ("retries", "Frames re-queued after a transient failure", self.retries),
            (
                "duplicates_discarded",
                "Duplicate frames dropped by the writer",
                self.duplicates_discarded,
            ),
            (
                "stale_attempts_discarded",
                "Results from superseded attempts",
                self.stale_attempts_discarded,
            ),
            (
                "producer_stalls",
                "Times the producer waited on a full queue",
                self.producer_stalls,
            ),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP dcp_forge_{name}_total {help}");
            let _ = writeln!(output, "# TYPE dcp_forge_{name}_total counter");
            let _ = writeln!(output, "dcp_forge_{name}_total {value}");
        }

        output.push_str("# HELP dcp_forge_backend_calls_total Compression calls per backend\n");
        output.push_str("# TYPE dcp_forge_backend_calls_total counter\n");
        output.push_str(
            "# HELP dcp_forge_backend_failures_total Failed compression calls per backend\n",
        );
        output.push_str("# TYPE dcp_forge_backend_failures_total counter\n");
        output.push_str(
            "# HELP dcp_forge_backend_duration_seconds_total Accumulated compression time\n",
        );
        output.push_str("# TYPE dcp_forge_backend_duration_seconds_total counter\n");
        output.push_str(
            "# HELP dcp_forge_backend_duration_seconds_max Slowest compression call\n",
        );
        output.push_str("# TYPE dcp_forge_backend_duration_seconds_max gauge\n");
        for (backend, metrics) in &self.backends {
            let _ = writeln!(
                output,
                "dcp_forge_backend_calls_total{{backend=\"{backend}\"}} {}",
                metrics.calls
            );
            let _ = writeln!(
                output,
                "dcp_forge_backend_failures_total{{backend=\"{backend}\"}} {}",
                metrics.failures
            );
            let _ = writeln!(
                output,
                "dcp_forge_backend_duration_seconds_total{{backend=\"{backend}\"}} {:.6}",
                metrics.total_duration_ms / 1_000.0
            );
            let _ = writeln!(
                output,
                "dcp_forge_backend_duration_seconds_max{{backend=\"{backend}\"}} {:.6}",
                metrics.max_duration_ms / 1_000.0
            );
        }

        output.push_str(
            "# HELP dcp_forge_session_duration_seconds Total encode session duration\n",
        );
        output.push_str("# TYPE dcp_forge_session_duration_seconds gauge\n");
        let _ = writeln!(
            output,
            "dcp_forge_session_duration_seconds {:.6}",
            self.total_duration_ms / 1_000.0
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_record_on_drop() {
        let metrics = MetricsCollector::new();
        drop(metrics.start_backend("local-0"));
        drop(metrics.start_backend("local-0"));
        metrics.record_backend_failure("remote-a:1");
        metrics.record_retry();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.backends["local-0"].calls, 2);
        assert_eq!(snapshot.backends["remote-a:1"].failures, 1);
        assert_eq!(snapshot.retries, 1);

        let text = snapshot.to_prometheus();
        assert!(text.contains("dcp_forge_backend_calls_total{backend=\"local-0\"} 2"));
        assert!(text.contains("dcp_forge_retries_total 1"));
    }
}
