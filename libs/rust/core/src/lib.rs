//! Core of the model vault: versioned model artifacts with atomic activation,
//! count/age retention and degradation-triggered rollback, plus the tracing
//! and health plumbing shared by the registry service.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, TextEncoder};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod config;
pub mod degradation;
pub mod error;
pub mod manager;
pub mod record;
pub mod retention;
pub mod store;
pub mod telemetry;
pub mod version_id;

pub use config::{load_config, RegistryConfig, StoreBackend};
pub use degradation::{DegradationMonitor, DegradationVerdict};
pub use error::RegistryError;
pub use manager::{AutoRollbackOutcome, VersionManager};
pub use record::{Metadata, Metrics, ModelSummary, VersionRecord};
pub use retention::{RetentionPolicy, SweepReport};
pub use store::{ArtifactStore, FsStore, PointerStore, SledStore, VersionStore};

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static NODE_LIVENESS: AtomicBool = AtomicBool::new(true);
static NODE_READINESS: AtomicBool = AtomicBool::new(false);

pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }
pub fn mark_not_live() { NODE_LIVENESS.store(false, Ordering::SeqCst); }
pub fn is_ready() -> bool { NODE_READINESS.load(Ordering::SeqCst) }
pub fn is_live() -> bool { NODE_LIVENESS.load(Ordering::SeqCst) }

/// `RUST_LOG` drives filtering; `MODELVAULT_JSON_LOG=1` switches to JSON lines.
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("MODELVAULT_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry.with(fmt::layer().json().flatten_event(true).with_current_span(true).with_span_list(false)).try_init()?;
        } else {
            registry.with(fmt::layer().with_target(true).with_thread_ids(false).with_line_number(true)).try_init()?;
        }
        Ok(())
    })?;
    info!(target: "modelvault", service, "tracing initialized");
    Ok(())
}

/// Registers the lifecycle collectors so `/metrics` lists them before the first save.
pub fn init_metrics() { Lazy::force(&telemetry::METRICS); }

/// `/live`, `/ready` and `/metrics`, to be merged into a service router.
pub fn health_router() -> Router {
    Router::new()
        .route("/live", get(|| async { axum::Json(serde_json::json!({"live": is_live()})) }))
        .route("/ready", get(|| async { axum::Json(serde_json::json!({"ready": is_ready()})) }))
        .route("/metrics", get(metrics_handler))
}

async fn metrics_handler() -> Response {
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buf) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")).into_response();
    }
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buf).into_response()
}
