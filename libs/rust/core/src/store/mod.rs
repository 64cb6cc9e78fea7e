//! Durable persistence for artifacts, metadata records, current pointers and
//! the model-type catalog.
//!
//! Stores know nothing about the current-version guard or ordering; both live
//! in [`crate::manager::VersionManager`].

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::record::VersionRecord;

pub mod fs;
pub mod sled_store;

pub use self::fs::FsStore;
pub use self::sled_store::SledStore;

pub trait ArtifactStore: Send + Sync {
    /// Writes (or overwrites) the artifact and returns its storage location.
    fn save_artifact(&self, model_type: &str, version_id: &str, bytes: &[u8]) -> Result<String>;
    fn load_artifact(&self, model_type: &str, version_id: &str) -> Result<Vec<u8>>;
    fn artifact_exists(&self, model_type: &str, version_id: &str) -> Result<bool>;
    fn artifact_location(&self, model_type: &str, version_id: &str) -> String;
    /// When the artifact was last written; used to synthesize missing metadata.
    fn artifact_written_at(&self, model_type: &str, version_id: &str) -> Result<DateTime<Utc>>;
    /// Version ids with a stored artifact, in no particular order.
    fn list_artifacts(&self, model_type: &str) -> Result<Vec<String>>;

    fn save_metadata(&self, record: &VersionRecord) -> Result<()>;
    fn load_metadata(&self, model_type: &str, version_id: &str) -> Result<VersionRecord>;

    /// Removes artifact and metadata. A missing metadata record is not an error.
    fn delete(&self, model_type: &str, version_id: &str) -> Result<()>;

    fn register_model_type(&self, model_type: &str) -> Result<()>;
    fn model_types(&self) -> Result<Vec<String>>;
}

pub trait PointerStore: Send + Sync {
    fn current(&self, model_type: &str) -> Result<String>;
    /// Must be observable as either the old or the new target, never neither.
    fn set_current(&self, model_type: &str, version_id: &str) -> Result<()>;
}

pub trait VersionStore: ArtifactStore + PointerStore {}

impl<T: ArtifactStore + PointerStore> VersionStore for T {}

fn artifact_key(model_type: &str, version_id: &str) -> String { format!("{model_type}/{version_id}") }

/// Inverse of the artifact key: splits on the first separator.
pub fn split_artifact_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/').filter(|(t, v)| !t.is_empty() && !v.is_empty())
}
