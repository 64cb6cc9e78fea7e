//! Degradation check that drives automatic rollback.
//!
//! The newest listed version is taken to be the one that produced the
//! reported metrics. The baseline is the first older version that recorded
//! the watched metric. An improvement gives a negative degradation and never
//! triggers.

use serde::{Deserialize, Serialize};

use crate::record::{Metrics, VersionRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationMonitor {
    pub threshold_metric: String,
    pub degradation_threshold: f64,
}

impl Default for DegradationMonitor {
    fn default() -> Self { Self { threshold_metric: "accuracy".into(), degradation_threshold: 0.05 } }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum DegradationVerdict {
    /// The watched metric is not among the reported metrics.
    MetricMissing,
    /// No older version recorded the watched metric.
    NoBaseline,
    WithinThreshold { baseline_version: String, previous_score: f64, current_score: f64, degradation: f64 },
    Degraded { baseline_version: String, previous_score: f64, current_score: f64, degradation: f64 },
}

impl DegradationVerdict {
    /// Version to roll back to, if the verdict calls for one.
    pub fn rollback_target(&self) -> Option<&str> {
        match self { Self::Degraded { baseline_version, .. } => Some(baseline_version.as_str()), _ => None }
    }
}

impl DegradationMonitor {
    pub fn new(threshold_metric: impl Into<String>, degradation_threshold: f64) -> Self {
        Self { threshold_metric: threshold_metric.into(), degradation_threshold }
    }

    /// `versions` must be newest first.
    pub fn evaluate(&self, versions: &[VersionRecord], current_metrics: &Metrics) -> DegradationVerdict {
        let Some(current_score) = current_metrics.get(&self.threshold_metric).copied() else {
            return DegradationVerdict::MetricMissing;
        };
        let baseline = versions.iter().skip(1).find_map(|v| v.metric(&self.threshold_metric).map(|score| (v, score)));
        let Some((baseline, previous_score)) = baseline else { return DegradationVerdict::NoBaseline };
        let degradation = previous_score - current_score;
        let baseline_version = baseline.version_id.clone();
        if degradation > self.degradation_threshold {
            DegradationVerdict::Degraded { baseline_version, previous_score, current_score, degradation }
        } else {
            DegradationVerdict::WithinThreshold { baseline_version, previous_score, current_score, degradation }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn versions(scores: &[Option<f64>]) -> Vec<VersionRecord> {
        let now = Utc::now();
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut r = VersionRecord::synthesized("trend", &format!("v{i}"), String::new(), now - Duration::minutes(i as i64));
                if let Some(s) = s { r.performance_metrics.insert("accuracy".into(), *s); }
                r
            })
            .collect()
    }

    fn reported(acc: f64) -> Metrics { Metrics::from([("accuracy".to_string(), acc)]) }

    #[test]
    fn large_drop_against_nearest_recorded_baseline() {
        let monitor = DegradationMonitor::default();
        let listing = versions(&[Some(0.99), None, Some(0.90), Some(0.50)]);
        let verdict = monitor.evaluate(&listing, &reported(0.70));
        assert_eq!(verdict.rollback_target(), Some("v2"));
        match verdict { DegradationVerdict::Degraded { previous_score, .. } => assert_eq!(previous_score, 0.90), other => panic!("{other:?}") }
    }

    #[test]
    fn small_drop_or_improvement_does_not_trigger() {
        let monitor = DegradationMonitor::default();
        let listing = versions(&[None, Some(0.90)]);
        assert!(matches!(monitor.evaluate(&listing, &reported(0.88)), DegradationVerdict::WithinThreshold { .. }));
        assert!(matches!(monitor.evaluate(&listing, &reported(0.97)), DegradationVerdict::WithinThreshold { degradation, .. } if degradation < 0.0));
    }

    #[test]
    fn threshold_is_strict() {
        let monitor = DegradationMonitor::new("accuracy", 0.25);
        let listing = versions(&[None, Some(0.75)]);
        assert!(monitor.evaluate(&listing, &reported(0.5)).rollback_target().is_none());
    }

    #[test]
    fn missing_metric_or_baseline() {
        let monitor = DegradationMonitor::default();
        assert_eq!(monitor.evaluate(&versions(&[None, Some(0.9)]), &Metrics::new()), DegradationVerdict::MetricMissing);
        assert_eq!(monitor.evaluate(&versions(&[Some(0.9)]), &reported(0.1)), DegradationVerdict::NoBaseline);
        assert_eq!(monitor.evaluate(&[], &reported(0.1)), DegradationVerdict::NoBaseline);
    }
}
