//! Persisted version records and the key rules every store relies on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{RegistryError, Result};

pub type Metrics = BTreeMap<String, f64>;
pub type Metadata = serde_json::Map<String, serde_json::Value>;

const MAX_KEY_LEN: usize = 128;

/// Metadata record stored next to every artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub model_type: String,
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    pub model_path: String,
    #[serde(default)]
    pub performance_metrics: Metrics,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// sha256 of the artifact bytes, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl VersionRecord {
    /// Stand-in record for an artifact whose metadata is missing.
    pub fn synthesized(model_type: &str, version_id: &str, model_path: String, written_at: DateTime<Utc>) -> Self {
        Self {
            model_type: model_type.to_string(),
            version_id: version_id.to_string(),
            created_at: written_at,
            model_path,
            performance_metrics: Metrics::new(),
            metadata: Metadata::new(),
            last_updated: None,
            checksum: None,
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> { self.performance_metrics.get(name).copied() }

    /// Additive merge; keys absent from `update` keep their old values.
    pub fn merge_metrics(&mut self, update: &Metrics, now: DateTime<Utc>) {
        for (k, v) in update { self.performance_metrics.insert(k.clone(), *v); }
        self.last_updated = Some(now);
    }
}

/// Newest first, ties broken by version id (descending) so listings are deterministic.
pub fn newest_first(a: &VersionRecord, b: &VersionRecord) -> Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.version_id.cmp(&a.version_id))
}

/// Per-type entry of the version summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub total_versions: usize,
    pub current_version: Option<String>,
    pub latest_version: Option<String>,
    pub oldest_version: Option<String>,
    pub version_ids: Vec<String>,
}

impl ModelSummary {
    pub fn from_listing(current_version: Option<String>, versions: &[VersionRecord]) -> Self {
        Self {
            total_versions: versions.len(),
            current_version,
            latest_version: versions.first().map(|v| v.version_id.clone()),
            oldest_version: versions.last().map(|v| v.version_id.clone()),
            version_ids: versions.iter().map(|v| v.version_id.clone()).collect(),
        }
    }
}

/// model_type and version_id end up as path components and KV prefixes.
pub fn validate_key(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() { return Err(RegistryError::Validation(format!("{kind} must not be empty"))); }
    if value.len() > MAX_KEY_LEN { return Err(RegistryError::Validation(format!("{kind} longer than {MAX_KEY_LEN} bytes"))); }
    if value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(RegistryError::Validation(format!("{kind} {value:?} is not a valid storage key")));
    }
    Ok(())
}

pub fn validate_metrics(metrics: &Metrics) -> Result<()> {
    for (name, value) in metrics {
        if name.is_empty() { return Err(RegistryError::Validation("metric name must not be empty".into())); }
        if !value.is_finite() { return Err(RegistryError::Validation(format!("metric {name} is not finite"))); }
    }
    Ok(())
}
