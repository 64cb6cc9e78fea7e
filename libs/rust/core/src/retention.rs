//! Dual retention policy: a count cap and an age cutoff, never touching the
//! current version.
//!
//! Sweeps are best effort. A candidate that fails to delete is logged and
//! reported, and the rest of the sweep carries on; whatever is left behind is
//! picked up by the next sweep.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::record::VersionRecord;
use crate::store::ArtifactStore;
use crate::telemetry::METRICS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_versions: usize,
    pub retention_days: u32,
}

impl Default for RetentionPolicy { fn default() -> Self { Self { max_versions: 10, retention_days: 30 } } }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason { CountCap, Age }

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

impl RetentionPolicy {
    pub fn new(max_versions: usize, retention_days: u32) -> Self { Self { max_versions, retention_days } }

    /// `None` when the window reaches past the earliest representable instant;
    /// nothing ages out then.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Duration::try_days(i64::from(self.retention_days)).and_then(|window| now.checked_sub_signed(window))
    }

    /// `versions` must be newest first. Each candidate appears once, in listing order.
    pub fn candidates<'a>(&self, versions: &'a [VersionRecord], current: Option<&str>, now: DateTime<Utc>) -> Vec<(&'a VersionRecord, EvictionReason)> {
        let cutoff = self.cutoff(now);
        versions
            .iter()
            .enumerate()
            .filter(|(_, v)| Some(v.version_id.as_str()) != current)
            .filter_map(|(rank, v)| {
                if rank >= self.max_versions { Some((v, EvictionReason::CountCap)) }
                else if cutoff.is_some_and(|c| v.created_at < c) { Some((v, EvictionReason::Age)) }
                else { None }
            })
            .collect()
    }

    pub fn sweep<S: ArtifactStore + ?Sized>(&self, store: &S, model_type: &str, versions: &[VersionRecord], current: Option<&str>, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        for (v, reason) in self.candidates(versions, current, now) {
            match store.delete(model_type, &v.version_id) {
                Ok(()) => {
                    info!(model_type, version_id = %v.version_id, ?reason, "retention removed version");
                    METRICS.retention_deleted.with_label_values(&[model_type]).inc();
                    report.deleted.push(v.version_id.clone());
                }
                Err(e) => {
                    warn!(model_type, version_id = %v.version_id, error = %e, "retention delete failed, continuing sweep");
                    METRICS.retention_failures.with_label_values(&[model_type]).inc();
                    report.failed.push(v.version_id.clone());
                }
            }
        }
        report
    }
}
