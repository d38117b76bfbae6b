//! Logging and metrics initialization.
//!
//! Tracing goes through `tracing-subscriber` with an env filter; metrics go
//! through the `metrics` facade into a Prometheus recorder whose handle is
//! kept for the `metrics()` read API to render.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize logs and metrics once per process. Safe to call again; later
/// calls are no-ops.
pub fn init_telemetry() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "cu_core=info".into()),
    );
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if PROM_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROM_HANDLE.set(handle);
            describe();
        }
        Err(err) => {
            tracing::warn!(%err, "metrics recorder not installed");
        }
    }
}

fn describe() {
    metrics::describe_counter!(
        "cu_evaluation_total",
        "Messages evaluated, by stream type, message type and process error"
    );
    metrics::describe_counter!(
        "cu_evaluation_deduped_total",
        "Messages skipped because an identical identity was already evaluated"
    );
    metrics::describe_gauge!(
        "cu_memory_cache_entries",
        "Entries in the process memory cache"
    );
    metrics::describe_gauge!(
        "cu_memory_cache_resident_bytes",
        "Bytes held live in the process memory cache"
    );
    metrics::describe_gauge!(
        "cu_memory_cache_file_backed",
        "File-backed entries in the process memory cache"
    );
}

/// Count one evaluated message.
pub fn count_evaluation(stream_type: &'static str, message_type: &'static str, process_error: bool) {
    metrics::counter!(
        "cu_evaluation_total",
        "stream_type" => stream_type,
        "message_type" => message_type,
        "process_error" => if process_error { "true" } else { "false" },
    )
    .increment(1);
}

/// Count one replay-deduplicated message.
pub fn count_dedup() {
    metrics::counter!("cu_evaluation_deduped_total").increment(1);
}

/// Refresh cache gauges from the current usage counters.
pub fn record_cache_usage(usage: &crate::cache::CacheUsage) {
    metrics::gauge!("cu_memory_cache_entries").set(usage.entries as f64);
    metrics::gauge!("cu_memory_cache_resident_bytes").set(usage.resident_bytes as f64);
    metrics::gauge!("cu_memory_cache_file_backed").set(usage.file_backed as f64);
}

/// Prometheus exposition text for the `metrics()` read API.
pub fn render_metrics() -> String {
    match PROM_HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# metrics not initialized\n".to_string(),
    }
}
