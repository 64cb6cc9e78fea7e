//! Filesystem backend.
//!
//! ```text
//! <root>/versions/<model_type>/<version_id>.bin
//! <root>/metadata/<model_type>/<version_id>.json
//! <root>/current/<model_type>.json
//! <root>/catalog.json
//! ```
//!
//! Every file is written to a uniquely named temp file in the target directory
//! and renamed into place, so readers see either the old or the new content.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ArtifactStore, PointerStore};
use crate::error::{RegistryError, Result};
use crate::record::VersionRecord;

const ARTIFACT_EXT: &str = "bin";

/// Indirection record behind the current pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PointerRecord {
    model_type: String,
    version_id: String,
    model_path: String,
    updated_at: DateTime<Utc>,
}

pub struct FsStore {
    root: PathBuf,
    versions_dir: PathBuf,
    metadata_dir: PathBuf,
    current_dir: PathBuf,
    catalog_path: PathBuf,
    catalog_lock: Mutex<()>,
}

impl FsStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let versions_dir = root.join("versions");
        let metadata_dir = root.join("metadata");
        let current_dir = root.join("current");
        for dir in [&versions_dir, &metadata_dir, &current_dir] { fs::create_dir_all(dir)?; }
        info!(root = %root.display(), "filesystem version store opened");
        Ok(Self { catalog_path: root.join("catalog.json"), root, versions_dir, metadata_dir, current_dir, catalog_lock: Mutex::new(()) })
    }

    pub fn root(&self) -> &Path { &self.root }

    fn artifact_path(&self, model_type: &str, version_id: &str) -> PathBuf {
        self.versions_dir.join(model_type).join(format!("{version_id}.{ARTIFACT_EXT}"))
    }

    fn metadata_path(&self, model_type: &str, version_id: &str) -> PathBuf {
        self.metadata_dir.join(model_type).join(format!("{version_id}.json"))
    }

    fn pointer_path(&self, model_type: &str) -> PathBuf { self.current_dir.join(format!("{model_type}.json")) }

    fn read_catalog(&self) -> Result<Option<BTreeSet<String>>> {
        match fs::read(&self.catalog_path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Recovery path for stores whose catalog file was lost.
    fn scan_type_dirs(&self) -> Result<Vec<String>> {
        let mut types = Vec::new();
        for entry in fs::read_dir(&self.versions_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() { types.push(name.to_string()); }
            }
        }
        types.sort();
        Ok(types)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("record");
    let tmp = parent.join(format!(".{name}.{}.tmp", Uuid::new_v4()));
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    // The rename only survives a crash once the directory entry is on disk.
    #[cfg(unix)]
    File::open(parent)?.sync_all()?;
    Ok(())
}

fn missing(e: io::Error, what: impl FnOnce() -> String) -> RegistryError {
    if e.kind() == io::ErrorKind::NotFound { RegistryError::NotFound(what()) } else { e.into() }
}

impl ArtifactStore for FsStore {
    fn save_artifact(&self, model_type: &str, version_id: &str, bytes: &[u8]) -> Result<String> {
        let path = self.artifact_path(model_type, version_id);
        write_atomic(&path, bytes)?;
        debug!(model_type, version_id, size = bytes.len(), "artifact written");
        Ok(path.display().to_string())
    }

    fn load_artifact(&self, model_type: &str, version_id: &str) -> Result<Vec<u8>> {
        fs::read(self.artifact_path(model_type, version_id)).map_err(|e| missing(e, || format!("artifact {model_type}/{version_id}")))
    }

    fn artifact_exists(&self, model_type: &str, version_id: &str) -> Result<bool> {
        Ok(self.artifact_path(model_type, version_id).try_exists()?)
    }

    fn artifact_location(&self, model_type: &str, version_id: &str) -> String {
        self.artifact_path(model_type, version_id).display().to_string()
    }

    fn artifact_written_at(&self, model_type: &str, version_id: &str) -> Result<DateTime<Utc>> {
        let meta = fs::metadata(self.artifact_path(model_type, version_id)).map_err(|e| missing(e, || format!("artifact {model_type}/{version_id}")))?;
        Ok(DateTime::<Utc>::from(meta.modified()?))
    }

    fn list_artifacts(&self, model_type: &str) -> Result<Vec<String>> {
        let dir = self.versions_dir.join(model_type);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if name.starts_with('.') { continue; } // in-flight temp files
            if let Some(id) = name.strip_suffix(&format!(".{ARTIFACT_EXT}")) { ids.push(id.to_string()); }
        }
        Ok(ids)
    }

    fn save_metadata(&self, record: &VersionRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.metadata_path(&record.model_type, &record.version_id), &json)?;
        Ok(())
    }

    fn load_metadata(&self, model_type: &str, version_id: &str) -> Result<VersionRecord> {
        let bytes = fs::read(self.metadata_path(model_type, version_id)).map_err(|e| missing(e, || format!("metadata {model_type}/{version_id}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn delete(&self, model_type: &str, version_id: &str) -> Result<()> {
        let artifact = fs::remove_file(self.artifact_path(model_type, version_id));
        match fs::remove_file(self.metadata_path(model_type, version_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => debug!(model_type, version_id, "no metadata to delete"),
            Err(e) => return Err(e.into()),
        }
        artifact.map_err(|e| missing(e, || format!("artifact {model_type}/{version_id}")))
    }

    fn register_model_type(&self, model_type: &str) -> Result<()> {
        let _guard = self.catalog_lock.lock();
        let mut catalog = match self.read_catalog()? {
            Some(c) => c,
            None => self.scan_type_dirs()?.into_iter().collect(),
        };
        if catalog.contains(model_type) && self.catalog_path.exists() { return Ok(()); }
        catalog.insert(model_type.to_string());
        write_atomic(&self.catalog_path, &serde_json::to_vec_pretty(&catalog)?)?;
        Ok(())
    }

    fn model_types(&self) -> Result<Vec<String>> {
        match self.read_catalog()? {
            Some(c) => Ok(c.into_iter().collect()),
            None => self.scan_type_dirs(),
        }
    }
}

impl PointerStore for FsStore {
    fn current(&self, model_type: &str) -> Result<String> {
        let bytes = fs::read(self.pointer_path(model_type)).map_err(|e| missing(e, || format!("current version for {model_type}")))?;
        let record: PointerRecord = serde_json::from_slice(&bytes)?;
        Ok(record.version_id)
    }

    fn set_current(&self, model_type: &str, version_id: &str) -> Result<()> {
        let record = PointerRecord {
            model_type: model_type.to_string(),
            version_id: version_id.to_string(),
            model_path: self.artifact_location(model_type, version_id),
            updated_at: Utc::now(),
        };
        write_atomic(&self.pointer_path(model_type), &serde_json::to_vec_pretty(&record)?)?;
        Ok(())
    }
}
