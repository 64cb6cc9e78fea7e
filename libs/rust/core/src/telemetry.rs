//! Prometheus collectors for the version lifecycle, registered once in the
//! default registry that the `/metrics` endpoint encodes.
use once_cell::sync::Lazy;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};
use std::time::Duration;

pub struct VersioningMetrics {
    pub saves: IntCounterVec,
    pub save_failures: IntCounterVec,
    pub rollbacks: IntCounterVec,
    pub retention_deleted: IntCounterVec,
    pub retention_failures: IntCounterVec,
    pub save_latency_ms: HistogramVec,
}

pub static METRICS: Lazy<VersioningMetrics> = Lazy::new(|| VersioningMetrics {
    saves: register_int_counter_vec!("modelvault_saves_total", "Model versions persisted and activated", &["model_type"])
        .expect("register modelvault_saves_total"),
    save_failures: register_int_counter_vec!("modelvault_save_failures_total", "save_model calls aborted before the pointer swap", &["model_type"])
        .expect("register modelvault_save_failures_total"),
    rollbacks: register_int_counter_vec!("modelvault_rollbacks_total", "Current pointer moved back to an existing version", &["model_type", "trigger"])
        .expect("register modelvault_rollbacks_total"),
    retention_deleted: register_int_counter_vec!("modelvault_retention_deleted_total", "Versions removed by retention sweeps", &["model_type"])
        .expect("register modelvault_retention_deleted_total"),
    retention_failures: register_int_counter_vec!("modelvault_retention_failures_total", "Retention deletions that failed and were skipped", &["model_type"])
        .expect("register modelvault_retention_failures_total"),
    save_latency_ms: register_histogram_vec!(
        "modelvault_save_latency_ms",
        "Latency of save_model including the retention sweep (ms)",
        &["model_type"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0, 5000.0]
    )
    .expect("register modelvault_save_latency_ms"),
});

pub fn record_save_latency(model_type: &str, d: Duration) {
    METRICS.save_latency_ms.with_label_values(&[model_type]).observe(d.as_secs_f64() * 1000.0);
}
