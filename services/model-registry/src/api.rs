//! HTTP surface over the version manager.
//!
//! Store work is blocking, so every call goes through `spawn_blocking`.
//! Mutating routes take a per-model-type lock first.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::error;

use modelvault_core::record::validate_key;
use modelvault_core::{
    AutoRollbackOutcome, DegradationMonitor, Metadata, Metrics, ModelSummary, RegistryError, SweepReport, VersionManager, VersionRecord,
};

#[derive(Clone)]
pub struct AppState {
    manager: Arc<VersionManager>,
    locks: LockMap,
}

impl AppState {
    pub fn new(manager: VersionManager) -> Self { Self { manager: Arc::new(manager), locks: Arc::new(Mutex::new(HashMap::new())) } }

    /// Serializes writers of one model type. Invalid names are rejected before
    /// they reach the lock map, and an entry is dropped once nobody holds or
    /// awaits it.
    async fn lock_type(&self, model_type: &str) -> Result<TypeGuard, ApiError> {
        validate_key("model_type", model_type)?;
        let lock = self.locks.lock().entry(model_type.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        Ok(TypeGuard { locks: self.locks.clone(), model_type: model_type.to_string(), guard: Some(guard) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&VersionManager) -> modelvault_core::error::Result<T> + Send + 'static,
    {
        let manager = self.manager.clone();
        match tokio::task::spawn_blocking(move || f(&manager)).await {
            Ok(res) => res.map_err(ApiError::from),
            Err(e) => Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("worker failed: {e}"))),
        }
    }
}

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

struct TypeGuard {
    locks: LockMap,
    model_type: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TypeGuard {
    fn drop(&mut self) {
        // Clones are only handed out under the map lock, so a count of one here
        // means no other request holds or waits on this entry.
        let mut locks = self.locks.lock();
        self.guard.take();
        if locks.get(&self.model_type).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.model_type);
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self { Self { status, message: message.into() } }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let status = match &e {
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Forbidden(_) => StatusCode::FORBIDDEN,
            RegistryError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() { error!(error = %e, "request failed"); }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response { (self.status, Json(serde_json::json!({"error": self.message}))).into_response() }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    /// Base64 of the serialized model.
    pub artifact: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub performance_metrics: Option<Metrics>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SavedVersion { pub model_type: String, pub version_id: String }

#[derive(Debug, Serialize)]
pub struct LoadedVersion {
    pub artifact: String,
    pub record: VersionRecord,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest { pub version_id: String }

#[derive(Debug, Serialize)]
pub struct CurrentVersion { pub model_type: String, pub current_version: Option<String> }

#[derive(Debug, Deserialize)]
pub struct BestQuery { pub metric: Option<String> }

#[derive(Debug, Serialize)]
pub struct BestVersion { pub metric: String, pub version_id: Option<String> }

#[derive(Debug, Deserialize)]
pub struct DegradationRequest {
    pub current_metrics: Metrics,
    pub threshold_metric: Option<String>,
    pub degradation_threshold: Option<f64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/models/:model_type/versions", post(save_version).get(list_versions))
        .route("/models/:model_type/current", get(load_current))
        .route("/models/:model_type/versions/:version_id", get(load_version).delete(delete_version))
        .route("/models/:model_type/versions/:version_id/metrics", post(update_metrics))
        .route("/models/:model_type/rollback", post(rollback))
        .route("/models/:model_type/best", get(best_version))
        .route("/models/:model_type/degradation", post(check_degradation))
        .route("/models/:model_type/retention", post(enforce_retention))
        .route("/summary", get(summary))
        .with_state(state)
        .merge(modelvault_core::health_router())
}

pub async fn save_version(State(state): State<AppState>, Path(model_type): Path<String>, Json(req): Json<SaveRequest>) -> ApiResult<(StatusCode, Json<SavedVersion>)> {
    let artifact = STANDARD
        .decode(req.artifact.as_bytes())
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, format!("artifact is not valid base64: {e}")))?;
    let _guard = state.lock_type(&model_type).await?;
    let t = model_type.clone();
    let version_id = state.blocking(move |m| m.save_model(&t, &artifact, req.metadata, req.performance_metrics)).await?;
    Ok((StatusCode::CREATED, Json(SavedVersion { model_type, version_id })))
}

pub async fn list_versions(State(state): State<AppState>, Path(model_type): Path<String>) -> ApiResult<Json<Vec<VersionRecord>>> {
    Ok(Json(state.blocking(move |m| m.list_versions(&model_type)).await?))
}

pub async fn load_current(State(state): State<AppState>, Path(model_type): Path<String>) -> ApiResult<Json<LoadedVersion>> {
    let (bytes, record) = state.blocking(move |m| m.load_model(&model_type, None)).await?;
    Ok(Json(LoadedVersion { artifact: STANDARD.encode(bytes), record }))
}

pub async fn load_version(State(state): State<AppState>, Path((model_type, version_id)): Path<(String, String)>) -> ApiResult<Json<LoadedVersion>> {
    let (bytes, record) = state.blocking(move |m| m.load_model(&model_type, Some(&version_id))).await?;
    Ok(Json(LoadedVersion { artifact: STANDARD.encode(bytes), record }))
}

pub async fn delete_version(State(state): State<AppState>, Path((model_type, version_id)): Path<(String, String)>) -> ApiResult<StatusCode> {
    let _guard = state.lock_type(&model_type).await?;
    state.blocking(move |m| m.try_delete_version(&model_type, &version_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_metrics(
    State(state): State<AppState>,
    Path((model_type, version_id)): Path<(String, String)>,
    Json(metrics): Json<Metrics>,
) -> ApiResult<Json<VersionRecord>> {
    let _guard = state.lock_type(&model_type).await?;
    Ok(Json(state.blocking(move |m| m.try_update_performance_metrics(&model_type, &version_id, &metrics)).await?))
}

pub async fn rollback(State(state): State<AppState>, Path(model_type): Path<String>, Json(req): Json<RollbackRequest>) -> ApiResult<Json<CurrentVersion>> {
    let _guard = state.lock_type(&model_type).await?;
    let t = model_type.clone();
    let current_version = state
        .blocking(move |m| {
            m.try_rollback_model(&t, &req.version_id)?;
            m.current_version(&t)
        })
        .await?;
    Ok(Json(CurrentVersion { model_type, current_version }))
}

pub async fn best_version(State(state): State<AppState>, Path(model_type): Path<String>, Query(q): Query<BestQuery>) -> ApiResult<Json<BestVersion>> {
    let metric = q.metric.unwrap_or_else(|| "accuracy".to_string());
    let name = metric.clone();
    let version_id = state.blocking(move |m| m.get_best_performing_version(&model_type, &name)).await?;
    Ok(Json(BestVersion { metric, version_id }))
}

pub async fn check_degradation(
    State(state): State<AppState>,
    Path(model_type): Path<String>,
    Json(req): Json<DegradationRequest>,
) -> ApiResult<Json<AutoRollbackOutcome>> {
    let defaults = DegradationMonitor::default();
    let monitor = DegradationMonitor::new(
        req.threshold_metric.unwrap_or(defaults.threshold_metric),
        req.degradation_threshold.unwrap_or(defaults.degradation_threshold),
    );
    let _guard = state.lock_type(&model_type).await?;
    Ok(Json(state.blocking(move |m| m.try_auto_rollback(&model_type, &req.current_metrics, &monitor)).await?))
}

pub async fn enforce_retention(State(state): State<AppState>, Path(model_type): Path<String>) -> ApiResult<Json<SweepReport>> {
    let _guard = state.lock_type(&model_type).await?;
    Ok(Json(state.blocking(move |m| m.enforce_retention(&model_type)).await?))
}

pub async fn summary(State(state): State<AppState>) -> ApiResult<Json<BTreeMap<String, ModelSummary>>> {
    Ok(Json(state.blocking(|m| m.get_version_summary()).await?))
}
