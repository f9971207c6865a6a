//! Run metrics.
//!
//! A run is a one-shot process, so nothing scrapes it. Metrics are written once
//! at the end of the run to a Prometheus text file, to be picked up by the
//! node_exporter textfile collector.

// External crates
use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, TextEncoder, register_counter, register_gauge,
    register_histogram,
};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;
use tracing::instrument;

/// Helper to observe histogram duration
pub fn observe_duration(hist: &Histogram, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();
    hist.observe(elapsed);
}

lazy_static! {
    // ======== Target Metrics ========

    pub static ref TARGETS_CONFIGURED: Gauge = register_gauge!(
        "redis_monitor_targets_configured",
        "Number of Redis targets enumerated from the environment"
    ).unwrap();

    // ======== Status Poll Metrics ========

    pub static ref STATUS_POLLS_TOTAL: Counter = register_counter!(
        "redis_monitor_status_polls_total",
        "Total number of successful INFO requests"
    ).unwrap();

    pub static ref STATUS_POLL_RETRIES_TOTAL: Counter = register_counter!(
        "redis_monitor_status_poll_retries_total",
        "Total number of INFO attempts retried after a transport failure"
    ).unwrap();

    pub static ref STATUS_POLL_FAILURES_TOTAL: Counter = register_counter!(
        "redis_monitor_status_poll_failures_total",
        "Total number of INFO requests that failed after all retries"
    ).unwrap();

    pub static ref STATUS_POLL_DURATION_SECONDS: Histogram = register_histogram!(
        "redis_monitor_status_poll_duration_seconds",
        "Histogram of INFO request durations including retries (seconds)",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // ======== Indexing Metrics ========

    pub static ref DOCUMENTS_INDEXED_TOTAL: Counter = register_counter!(
        "redis_monitor_documents_indexed_total",
        "Total number of snapshot documents accepted by Elasticsearch"
    ).unwrap();

    pub static ref INDEX_FAILURES_TOTAL: Counter = register_counter!(
        "redis_monitor_index_failures_total",
        "Total number of snapshot documents rejected or not delivered"
    ).unwrap();

    pub static ref INDEX_DURATION_SECONDS: Histogram = register_histogram!(
        "redis_monitor_index_duration_seconds",
        "Histogram of document index request durations (seconds)",
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // ======== Lifecycle Metrics ========

    pub static ref LAST_SUCCESS_TIMESTAMP_SECONDS: Gauge = register_gauge!(
        "redis_monitor_last_success_timestamp_seconds",
        "Unix time of the last run that indexed every target"
    ).unwrap();
}

/// Encode every registered metric in Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Write all metrics to `path`, replacing it atomically so a collector never
/// reads a half-written file.
#[instrument(
    name = "redis_monitor_metrics::write_textfile",
    target = "metrics::metrics",
    skip_all,
    level = "debug"
)]
pub fn write_textfile(path: &Path) -> io::Result<()> {
    let rendered = render().map_err(io::Error::other)?;

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");

    fs::write(&staging, rendered)?;
    fs::rename(&staging, path)?;

    tracing::debug!(metrics_textfile = %path.display(), "Metrics text file written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_duration_records_one_sample() {
        let before = INDEX_DURATION_SECONDS.get_sample_count();
        observe_duration(&INDEX_DURATION_SECONDS, Instant::now());
        assert!(INDEX_DURATION_SECONDS.get_sample_count() > before);
    }

    #[test]
    fn textfile_contains_run_metrics() {
        TARGETS_CONFIGURED.set(2.0);
        STATUS_POLLS_TOTAL.inc();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redis_monitor.prom");
        write_textfile(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("redis_monitor_targets_configured"));
        assert!(contents.contains("# TYPE redis_monitor_status_polls_total counter"));
        assert!(!dir.path().join("redis_monitor.prom.tmp").exists());
    }
}
