use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use modelvault_core::{
    DegradationMonitor, DegradationVerdict, FsStore, Metadata, Metrics, PointerStore, RegistryError, RetentionPolicy, SledStore,
    VersionManager, VersionStore,
};
use serde_json::json;
use tempfile::TempDir;

fn on_each_backend(check: impl Fn(Arc<dyn VersionStore>)) {
    let dir = TempDir::new().unwrap();
    check(Arc::new(FsStore::open(dir.path()).unwrap()));
    check(Arc::new(SledStore::temporary().unwrap()));
}

fn manager(store: &Arc<dyn VersionStore>) -> VersionManager { VersionManager::new(store.clone(), RetentionPolicy::default()) }

fn accuracy(v: f64) -> Option<Metrics> { Some(Metrics::from([("accuracy".to_string(), v)])) }

#[test]
fn save_then_load_round_trips_artifact_and_metadata() {
    on_each_backend(|store| {
        let mgr = manager(&store);
        let meta: Metadata = json!({"trainer": "isolation_forest", "features": 42}).as_object().cloned().unwrap();
        let id = mgr.save_model("anomaly_detection", b"\x00\x01weights", Some(meta), accuracy(0.91)).unwrap();
        let (bytes, record) = mgr.load_model("anomaly_detection", None).unwrap();
        assert_eq!(bytes, b"\x00\x01weights");
        assert_eq!(record.version_id, id);
        assert_eq!(record.metadata["trainer"], "isolation_forest");
        assert_eq!(record.metadata["features"], 42);
        assert_eq!(record.metric("accuracy"), Some(0.91));
        assert!(record.checksum.is_some());
    });
}

#[test]
fn current_pointer_follows_the_latest_save() {
    on_each_backend(|store| {
        let mgr = manager(&store);
        let mut last = String::new();
        for i in 0..5u8 {
            last = mgr.save_model("trend_analysis", &[i; 8], None, None).unwrap();
        }
        let (bytes, record) = mgr.load_model("trend_analysis", None).unwrap();
        assert_eq!(bytes, vec![4u8; 8]);
        assert_eq!(record.version_id, last);
        assert_eq!(mgr.current_version("trend_analysis").unwrap().as_deref(), Some(last.as_str()));
    });
}

#[test]
fn sweep_never_evicts_a_rolled_back_current_version() {
    on_each_backend(|store| {
        let mgr = manager(&store);
        let ids: Vec<String> = (0..5u8).map(|i| mgr.save_model("clustering", &[i], None, None).unwrap()).collect();
        assert!(mgr.rollback_model("clustering", &ids[1]));

        let tight = VersionManager::new(store.clone(), RetentionPolicy::new(2, 30));
        let report = tight.enforce_retention("clustering").unwrap();
        assert_eq!(report.deleted, vec![ids[2].clone(), ids[0].clone()]);
        assert!(report.failed.is_empty());

        let (bytes, record) = tight.load_model("clustering", None).unwrap();
        assert_eq!(bytes, vec![1u8]);
        assert_eq!(record.version_id, ids[1]);
        let remaining: Vec<String> = tight.list_versions("clustering").unwrap().into_iter().map(|v| v.version_id).collect();
        assert_eq!(remaining, vec![ids[4].clone(), ids[3].clone(), ids[1].clone()]);
    });
}

#[test]
fn post_save_sweep_applies_the_count_cap() {
    on_each_backend(|store| {
        let mgr = VersionManager::new(store.clone(), RetentionPolicy::new(3, 30));
        let ids: Vec<String> = (0..6u8).map(|i| mgr.save_model("recommendation", &[i], None, None).unwrap()).collect();
        let listed: Vec<String> = mgr.list_versions("recommendation").unwrap().into_iter().map(|v| v.version_id).collect();
        assert_eq!(listed, vec![ids[5].clone(), ids[4].clone(), ids[3].clone()]);
    });
}

#[test]
fn current_version_cannot_be_deleted() {
    on_each_backend(|store| {
        let mgr = manager(&store);
        let old = mgr.save_model("anomaly_detection", b"old", None, None).unwrap();
        let cur = mgr.save_model("anomaly_detection", b"cur", None, None).unwrap();
        assert!(!mgr.delete_version("anomaly_detection", &cur));
        assert_eq!(mgr.load_model("anomaly_detection", Some(&cur)).unwrap().0, b"cur");

        assert!(mgr.delete_version("anomaly_detection", &old));
        assert!(matches!(mgr.load_model("anomaly_detection", Some(&old)), Err(RegistryError::NotFound(_))));
        assert!(!mgr.delete_version("anomaly_detection", &old));
    });
}

#[test]
fn best_version_prefers_newest_on_ties() {
    on_each_backend(|store| {
        let mgr = manager(&store);
        mgr.save_model("recommendation", b"v1", None, accuracy(0.90)).unwrap();
        mgr.save_model("recommendation", b"v2", None, accuracy(0.95)).unwrap();
        let v3 = mgr.save_model("recommendation", b"v3", None, accuracy(0.95)).unwrap();
        mgr.save_model("recommendation", b"v4", None, Some(Metrics::from([("f1".to_string(), 0.99)]))).unwrap();
        assert_eq!(mgr.get_best_performing_version("recommendation", "accuracy").unwrap(), Some(v3));
        assert_eq!(mgr.get_best_performing_version("recommendation", "precision").unwrap(), None);
    });
}

#[test]
fn degradation_beyond_threshold_rolls_back() {
    on_each_backend(|store| {
        let mgr = manager(&store);
        let baseline = mgr.save_model("anomaly_detection", b"v1", None, accuracy(0.90)).unwrap();
        let latest = mgr.save_model("anomaly_detection", b"v2", None, None).unwrap();

        let mild = Metrics::from([("accuracy".to_string(), 0.88)]);
        assert!(!mgr.auto_rollback_on_degradation("anomaly_detection", &mild, "accuracy", 0.05));
        assert_eq!(mgr.current_version("anomaly_detection").unwrap().as_deref(), Some(latest.as_str()));

        let severe = Metrics::from([("accuracy".to_string(), 0.70)]);
        assert!(mgr.auto_rollback_on_degradation("anomaly_detection", &severe, "accuracy", 0.05));
        assert_eq!(mgr.current_version("anomaly_detection").unwrap().as_deref(), Some(baseline.as_str()));
    });
}

#[test]
fn degradation_verdict_explains_no_rollback() {
    on_each_backend(|store| {
        let mgr = manager(&store);
        mgr.save_model("trend_analysis", b"only", None, accuracy(0.90)).unwrap();
        let monitor = DegradationMonitor::default();
        let verdict = mgr.evaluate_degradation("trend_analysis", &Metrics::from([("accuracy".to_string(), 0.10)]), &monitor).unwrap();
        assert_eq!(verdict, DegradationVerdict::NoBaseline);
        let outcome = mgr.try_auto_rollback("trend_analysis", &Metrics::new(), &monitor).unwrap();
        assert_eq!(outcome.verdict, DegradationVerdict::MetricMissing);
        assert!(!outcome.rolled_back);
    });
}

#[test]
fn listing_is_strictly_newest_first() {
    on_each_backend(|store| {
        let mgr = manager(&store);
        for i in 0..7u8 {
            mgr.save_model("clustering", &[i], None, None).unwrap();
        }
        let versions = mgr.list_versions("clustering").unwrap();
        assert_eq!(versions.len(), 7);
        for pair in versions.windows(2) {
            assert!(pair[0].created_at > pair[1].created_at);
            assert!(pair[0].version_id > pair[1].version_id);
        }
        assert!(mgr.list_versions("never_saved").unwrap().is_empty());
    });
}

#[test]
fn metric_updates_merge_into_the_record() {
    on_each_backend(|store| {
        let mgr = manager(&store);
        let id = mgr.save_model("anomaly_detection", b"m", None, None).unwrap();
        assert!(mgr.update_performance_metrics("anomaly_detection", &id, &Metrics::from([("accuracy".to_string(), 0.9)])));
        assert!(mgr.update_performance_metrics("anomaly_detection", &id, &Metrics::from([("f1".to_string(), 0.8)])));
        let (_, record) = mgr.load_model("anomaly_detection", Some(&id)).unwrap();
        assert_eq!(record.metric("accuracy"), Some(0.9));
        assert_eq!(record.metric("f1"), Some(0.8));
        assert!(record.last_updated.is_some());
    });
}

#[test]
fn summary_covers_every_saved_type() {
    on_each_backend(|store| {
        let mgr = manager(&store);
        let a1 = mgr.save_model("anomaly_detection", b"a1", None, None).unwrap();
        let a2 = mgr.save_model("anomaly_detection", b"a2", None, None).unwrap();
        let c1 = mgr.save_model("clustering", b"c1", None, None).unwrap();
        let summary = mgr.get_version_summary().unwrap();
        assert_eq!(summary.keys().map(String::as_str).collect::<Vec<_>>(), vec!["anomaly_detection", "clustering"]);
        let anomaly = &summary["anomaly_detection"];
        assert_eq!(anomaly.total_versions, 2);
        assert_eq!(anomaly.current_version.as_deref(), Some(a2.as_str()));
        assert_eq!(anomaly.latest_version.as_deref(), Some(a2.as_str()));
        assert_eq!(anomaly.oldest_version.as_deref(), Some(a1.as_str()));
        assert_eq!(summary["clustering"].version_ids, vec![c1]);
    });
}

#[test]
fn readers_never_observe_a_missing_pointer_during_swaps() {
    on_each_backend(|store| {
        let mgr = manager(&store);
        let v1 = mgr.save_model("anomaly_detection", b"one", None, None).unwrap();
        let v2 = mgr.save_model("anomaly_detection", b"two", None, None).unwrap();
        let done = AtomicBool::new(false);
        let (done, store, mgr, v1, v2) = (&done, &store, &mgr, &v1, &v2);
        thread::scope(|s| {
            let readers: Vec<_> = (0..4)
                .map(move |_| {
                    s.spawn(move || {
                        loop {
                            let seen = store.current("anomaly_detection").unwrap();
                            assert!(seen == *v1 || seen == *v2, "unexpected pointer {seen}");
                            let (bytes, record) = mgr.load_model("anomaly_detection", None).unwrap();
                            assert!(record.version_id == *v1 || record.version_id == *v2);
                            assert!(bytes == b"one" || bytes == b"two");
                            if done.load(Ordering::SeqCst) { break; }
                        }
                    })
                })
                .collect();
            for i in 0..200 {
                store.set_current("anomaly_detection", if i % 2 == 0 { v1 } else { v2 }).unwrap();
            }
            done.store(true, Ordering::SeqCst);
            for r in readers { r.join().unwrap(); }
        });
    });
}
