//! Embedded backend on sled. One tree per concern, keys are
//! `<model_type>/<version_id>` (or just `<model_type>` for pointers and the
//! catalog). A pointer update is a single-key insert, which sled applies
//! atomically.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sled::{Db, Tree};
use tracing::{debug, info};

use super::{artifact_key, split_artifact_key, ArtifactStore, PointerStore};
use crate::error::{RegistryError, Result};
use crate::record::VersionRecord;

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    artifacts: Tree,
    written_at: Tree,
    metadata: Tree,
    current: Tree,
    catalog: Tree,
}

#[derive(Debug, Clone, Default)]
pub struct SledStoreOptions {
    pub path: Option<PathBuf>,
    /// Discard everything when the store is dropped (tests, dry runs).
    pub temporary: bool,
}

impl SledStore {
    pub fn open(opts: SledStoreOptions) -> Result<Self> {
        let path = opts.path.unwrap_or_else(|| PathBuf::from("models/registry.sled"));
        info!(path = %path.display(), temporary = opts.temporary, "sled version store opening");
        let db = sled::Config::new().path(path).temporary(opts.temporary).open()?;
        Self::from_db(db)
    }

    pub fn temporary() -> Result<Self> { Self::from_db(sled::Config::new().temporary(true).open()?) }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            artifacts: db.open_tree("artifacts")?,
            written_at: db.open_tree("written_at")?,
            metadata: db.open_tree("metadata")?,
            current: db.open_tree("current")?,
            catalog: db.open_tree("catalog")?,
            db,
        })
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| RegistryError::Storage(format!("non utf-8 {what} key")))
}

impl ArtifactStore for SledStore {
    fn save_artifact(&self, model_type: &str, version_id: &str, bytes: &[u8]) -> Result<String> {
        let key = artifact_key(model_type, version_id);
        self.artifacts.insert(key.as_bytes(), bytes)?;
        self.written_at.insert(key.as_bytes(), Utc::now().to_rfc3339().as_bytes())?;
        self.flush()?;
        debug!(model_type, version_id, size = bytes.len(), "artifact written");
        Ok(self.artifact_location(model_type, version_id))
    }

    fn load_artifact(&self, model_type: &str, version_id: &str) -> Result<Vec<u8>> {
        self.artifacts
            .get(artifact_key(model_type, version_id))?
            .map(|v| v.to_vec())
            .ok_or_else(|| RegistryError::not_found(format!("artifact {model_type}/{version_id}")))
    }

    fn artifact_exists(&self, model_type: &str, version_id: &str) -> Result<bool> {
        Ok(self.artifacts.contains_key(artifact_key(model_type, version_id))?)
    }

    fn artifact_location(&self, model_type: &str, version_id: &str) -> String {
        format!("sled://artifacts/{}", artifact_key(model_type, version_id))
    }

    fn artifact_written_at(&self, model_type: &str, version_id: &str) -> Result<DateTime<Utc>> {
        let raw = self
            .written_at
            .get(artifact_key(model_type, version_id))?
            .ok_or_else(|| RegistryError::not_found(format!("artifact {model_type}/{version_id}")))?;
        let text = utf8(&raw, "timestamp")?;
        DateTime::parse_from_rfc3339(&text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| RegistryError::Storage(format!("bad write timestamp for {model_type}/{version_id}: {e}")))
    }

    fn list_artifacts(&self, model_type: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for kv in self.artifacts.scan_prefix(format!("{model_type}/")) {
            let (k, _) = kv?;
            let key = utf8(&k, "artifact")?;
            if let Some((_, id)) = split_artifact_key(&key) { ids.push(id.to_string()); }
        }
        Ok(ids)
    }

    fn save_metadata(&self, record: &VersionRecord) -> Result<()> {
        let json = serde_json::to_vec(record)?;
        self.metadata.insert(artifact_key(&record.model_type, &record.version_id).as_bytes(), json)?;
        self.flush()
    }

    fn load_metadata(&self, model_type: &str, version_id: &str) -> Result<VersionRecord> {
        let raw = self
            .metadata
            .get(artifact_key(model_type, version_id))?
            .ok_or_else(|| RegistryError::not_found(format!("metadata {model_type}/{version_id}")))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn delete(&self, model_type: &str, version_id: &str) -> Result<()> {
        let key = artifact_key(model_type, version_id);
        let removed = self.artifacts.remove(key.as_bytes())?;
        self.written_at.remove(key.as_bytes())?;
        self.metadata.remove(key.as_bytes())?;
        self.flush()?;
        match removed {
            Some(_) => Ok(()),
            None => Err(RegistryError::not_found(format!("artifact {key}"))),
        }
    }

    fn register_model_type(&self, model_type: &str) -> Result<()> {
        if self.catalog.insert(model_type.as_bytes(), &[] as &[u8])?.is_none() { self.flush()?; }
        Ok(())
    }

    fn model_types(&self) -> Result<Vec<String>> {
        let mut types = Vec::new();
        for kv in self.catalog.iter() {
            let (k, _) = kv?;
            types.push(utf8(&k, "catalog")?);
        }
        Ok(types)
    }
}

impl PointerStore for SledStore {
    fn current(&self, model_type: &str) -> Result<String> {
        let raw = self
            .current
            .get(model_type.as_bytes())?
            .ok_or_else(|| RegistryError::not_found(format!("current version for {model_type}")))?;
        utf8(&raw, "pointer")
    }

    fn set_current(&self, model_type: &str, version_id: &str) -> Result<()> {
        self.current.insert(model_type.as_bytes(), version_id.as_bytes())?;
        self.flush()
    }
}
