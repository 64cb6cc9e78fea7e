//! Versioned model artifacts: save, load, rollback, retention and
//! degradation-triggered rollback behind one contract.
//!
//! A save persists artifact then metadata, registers the model type, and only
//! then moves the current pointer, so a failed save leaves the previous
//! version active. The retention sweep runs afterwards and never fails the
//! save. Callers are expected to serialize writers of the same model type;
//! different model types share nothing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::degradation::{DegradationMonitor, DegradationVerdict};
use crate::error::{RegistryError, Result};
use crate::record::{newest_first, validate_key, validate_metrics, Metadata, Metrics, ModelSummary, VersionRecord};
use crate::retention::{RetentionPolicy, SweepReport};
use crate::store::VersionStore;
use crate::telemetry::{record_save_latency, METRICS};
use crate::version_id::VersionIdGenerator;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoRollbackOutcome {
    pub verdict: DegradationVerdict,
    pub rolled_back: bool,
}

pub struct VersionManager {
    store: Arc<dyn VersionStore>,
    retention: RetentionPolicy,
    ids: VersionIdGenerator,
}

fn sha256_hex(bytes: &[u8]) -> String { hex::encode(Sha256::digest(bytes)) }

impl VersionManager {
    pub fn new(store: Arc<dyn VersionStore>, retention: RetentionPolicy) -> Self {
        info!(max_versions = retention.max_versions, retention_days = retention.retention_days, "version manager initialized");
        Self { store, retention, ids: VersionIdGenerator::new() }
    }

    pub fn retention(&self) -> RetentionPolicy { self.retention }

    pub fn save_model(&self, model_type: &str, artifact: &[u8], metadata: Option<Metadata>, metrics: Option<Metrics>) -> Result<String> {
        let started = Instant::now();
        validate_key("model_type", model_type)?;
        let metrics = metrics.unwrap_or_default();
        validate_metrics(&metrics)?;
        let persisted = self
            .fresh_version_id(model_type)
            .and_then(|(version_id, created_at)| {
                self.persist(model_type, &version_id, created_at, artifact, metadata.unwrap_or_default(), metrics).map(|()| version_id)
            });
        let version_id = match persisted {
            Ok(id) => id,
            Err(e) => {
                error!(model_type, error = %e, "save failed, current version unchanged");
                METRICS.save_failures.with_label_values(&[model_type]).inc();
                return Err(e);
            }
        };
        info!(model_type, version_id = %version_id, size = artifact.len(), "saved and activated model version");
        METRICS.saves.with_label_values(&[model_type]).inc();
        match self.enforce_retention(model_type) {
            Ok(report) if !report.deleted.is_empty() || !report.failed.is_empty() => {
                info!(model_type, deleted = report.deleted.len(), failed = report.failed.len(), "post-save retention sweep");
            }
            Ok(_) => {}
            Err(e) => warn!(model_type, error = %e, "post-save retention sweep skipped"),
        }
        record_save_latency(model_type, started.elapsed());
        Ok(version_id)
    }

    /// Skips ids another writer already used, so a save never overwrites a stored version.
    fn fresh_version_id(&self, model_type: &str) -> Result<(String, DateTime<Utc>)> {
        loop {
            let (version_id, created_at) = self.ids.next();
            if !self.store.artifact_exists(model_type, &version_id)? { return Ok((version_id, created_at)); }
            warn!(model_type, version_id = %version_id, "version id already taken, issuing the next one");
        }
    }

    fn persist(&self, model_type: &str, version_id: &str, created_at: DateTime<Utc>, artifact: &[u8], metadata: Metadata, metrics: Metrics) -> Result<()> {
        let model_path = self.store.save_artifact(model_type, version_id, artifact)?;
        let record = VersionRecord {
            model_type: model_type.to_string(),
            version_id: version_id.to_string(),
            created_at,
            model_path,
            performance_metrics: metrics,
            metadata,
            last_updated: None,
            checksum: Some(sha256_hex(artifact)),
        };
        if let Err(e) = self.store.save_metadata(&record) {
            if let Err(cleanup) = self.store.delete(model_type, version_id) {
                warn!(model_type, version_id, error = %cleanup, "orphaned artifact left behind");
            }
            return Err(e);
        }
        self.store.register_model_type(model_type)?;
        self.store.set_current(model_type, version_id)
    }

    /// `None` resolves through the current pointer.
    pub fn load_model(&self, model_type: &str, version_id: Option<&str>) -> Result<(Vec<u8>, VersionRecord)> {
        validate_key("model_type", model_type)?;
        let version_id = match version_id {
            Some(v) => { validate_key("version_id", v)?; v.to_string() }
            None => self.current_version(model_type)?.ok_or_else(|| RegistryError::not_found(format!("no current version for {model_type}")))?,
        };
        let artifact = self.store.load_artifact(model_type, &version_id)?;
        let record = self.read_record(model_type, &version_id)?;
        if let Some(expected) = &record.checksum {
            if sha256_hex(&artifact) != *expected {
                return Err(RegistryError::Storage(format!("checksum mismatch for {model_type}/{version_id}")));
            }
        }
        debug!(model_type, version_id = %version_id, "loaded model version");
        Ok((artifact, record))
    }

    /// Metadata for a stored artifact, synthesized from the write time if the record is gone.
    fn read_record(&self, model_type: &str, version_id: &str) -> Result<VersionRecord> {
        match self.store.load_metadata(model_type, version_id) {
            Ok(record) => Ok(record),
            Err(e) => {
                if !e.is_not_found() { warn!(model_type, version_id, error = %e, "unreadable metadata, synthesizing"); }
                let written_at = self.store.artifact_written_at(model_type, version_id)?;
                Ok(VersionRecord::synthesized(model_type, version_id, self.store.artifact_location(model_type, version_id), written_at))
            }
        }
    }

    /// Newest first; ties broken by version id.
    pub fn list_versions(&self, model_type: &str) -> Result<Vec<VersionRecord>> {
        validate_key("model_type", model_type)?;
        let mut versions = Vec::new();
        for version_id in self.store.list_artifacts(model_type)? {
            match self.read_record(model_type, &version_id) {
                Ok(record) => versions.push(record),
                Err(e) if e.is_not_found() => debug!(model_type, version_id = %version_id, "version vanished while listing"),
                Err(e) => return Err(e),
            }
        }
        versions.sort_by(newest_first);
        Ok(versions)
    }

    pub fn current_version(&self, model_type: &str) -> Result<Option<String>> {
        match self.store.current(model_type) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn rollback_model(&self, model_type: &str, version_id: &str) -> bool {
        match self.try_rollback_model(model_type, version_id) {
            Ok(()) => true,
            Err(e) => { error!(model_type, version_id, error = %e, "rollback failed"); false }
        }
    }

    pub fn try_rollback_model(&self, model_type: &str, version_id: &str) -> Result<()> { self.repoint(model_type, version_id, "manual") }

    fn repoint(&self, model_type: &str, version_id: &str, trigger: &str) -> Result<()> {
        validate_key("model_type", model_type)?;
        validate_key("version_id", version_id)?;
        if !self.store.artifact_exists(model_type, version_id)? {
            return Err(RegistryError::not_found(format!("version {version_id} of {model_type}")));
        }
        self.store.set_current(model_type, version_id)?;
        METRICS.rollbacks.with_label_values(&[model_type, trigger]).inc();
        info!(model_type, version_id, trigger, "rolled back model");
        Ok(())
    }

    pub fn delete_version(&self, model_type: &str, version_id: &str) -> bool {
        match self.try_delete_version(model_type, version_id) {
            Ok(()) => true,
            Err(e) => { error!(model_type, version_id, error = %e, "delete failed"); false }
        }
    }

    pub fn try_delete_version(&self, model_type: &str, version_id: &str) -> Result<()> {
        validate_key("model_type", model_type)?;
        validate_key("version_id", version_id)?;
        if self.current_version(model_type)?.as_deref() == Some(version_id) {
            return Err(RegistryError::Forbidden(format!("{version_id} is the current version of {model_type}")));
        }
        self.store.delete(model_type, version_id)?;
        info!(model_type, version_id, "deleted model version");
        Ok(())
    }

    pub fn update_performance_metrics(&self, model_type: &str, version_id: &str, metrics: &Metrics) -> bool {
        match self.try_update_performance_metrics(model_type, version_id, metrics) {
            Ok(_) => true,
            Err(e) => { error!(model_type, version_id, error = %e, "metrics update failed"); false }
        }
    }

    /// Merges into the stored record; synthesized records are not upgraded.
    pub fn try_update_performance_metrics(&self, model_type: &str, version_id: &str, metrics: &Metrics) -> Result<VersionRecord> {
        validate_key("model_type", model_type)?;
        validate_key("version_id", version_id)?;
        validate_metrics(metrics)?;
        let mut record = self.store.load_metadata(model_type, version_id)?;
        record.merge_metrics(metrics, Utc::now());
        self.store.save_metadata(&record)?;
        info!(model_type, version_id, keys = metrics.len(), "updated performance metrics");
        Ok(record)
    }

    /// Strictly greatest value wins; on ties the first in listing order (the newest) is kept.
    pub fn get_best_performing_version(&self, model_type: &str, metric: &str) -> Result<Option<String>> {
        let versions = self.list_versions(model_type)?;
        let mut best: Option<(&VersionRecord, f64)> = None;
        for v in &versions {
            if let Some(score) = v.metric(metric) {
                if best.map_or(true, |(_, top)| score > top) { best = Some((v, score)); }
            }
        }
        match best {
            Some((v, score)) => info!(model_type, metric, version_id = %v.version_id, score, "best performing version"),
            None => warn!(model_type, metric, "no version recorded this metric"),
        }
        Ok(best.map(|(v, _)| v.version_id.clone()))
    }

    pub fn evaluate_degradation(&self, model_type: &str, current_metrics: &Metrics, monitor: &DegradationMonitor) -> Result<DegradationVerdict> {
        let versions = self.list_versions(model_type)?;
        Ok(monitor.evaluate(&versions, current_metrics))
    }

    pub fn try_auto_rollback(&self, model_type: &str, current_metrics: &Metrics, monitor: &DegradationMonitor) -> Result<AutoRollbackOutcome> {
        let verdict = self.evaluate_degradation(model_type, current_metrics, monitor)?;
        let metric = monitor.threshold_metric.as_str();
        match &verdict {
            DegradationVerdict::MetricMissing => warn!(model_type, metric, "metric missing from reported metrics"),
            DegradationVerdict::NoBaseline => warn!(model_type, metric, "no previous version recorded the metric"),
            DegradationVerdict::WithinThreshold { degradation, .. } => info!(model_type, metric, degradation, "no significant degradation"),
            DegradationVerdict::Degraded { previous_score, current_score, .. } => {
                warn!(model_type, metric, previous_score, current_score, "performance degradation detected")
            }
        }
        let Some(target) = verdict.rollback_target() else { return Ok(AutoRollbackOutcome { verdict, rolled_back: false }) };
        self.repoint(model_type, target, "degradation")?;
        Ok(AutoRollbackOutcome { rolled_back: true, verdict })
    }

    pub fn auto_rollback_on_degradation(&self, model_type: &str, current_metrics: &Metrics, threshold_metric: &str, degradation_threshold: f64) -> bool {
        let monitor = DegradationMonitor::new(threshold_metric, degradation_threshold);
        match self.try_auto_rollback(model_type, current_metrics, &monitor) {
            Ok(outcome) => outcome.rolled_back,
            Err(e) => { error!(model_type, error = %e, "auto-rollback failed"); false }
        }
    }

    /// Runs the retention sweep for one model type.
    pub fn enforce_retention(&self, model_type: &str) -> Result<SweepReport> {
        let versions = self.list_versions(model_type)?;
        let current = self.current_version(model_type)?;
        Ok(self.retention.sweep(self.store.as_ref(), model_type, &versions, current.as_deref(), Utc::now()))
    }

    /// Every model type in the catalog, including ones whose versions are all gone.
    pub fn get_version_summary(&self) -> Result<BTreeMap<String, ModelSummary>> {
        let mut summary = BTreeMap::new();
        for model_type in self.store.model_types()? {
            let versions = self.list_versions(&model_type)?;
            let current = self.current_version(&model_type)?;
            summary.insert(model_type, ModelSummary::from_listing(current, &versions));
        }
        Ok(summary)
    }
}
