//! Service configuration: defaults, then an optional file named by
//! `MODELVAULT_CONFIG_FILE`, then `MODELVAULT__*` environment variables, then
//! the legacy `MODEL_DIR` / `MAX_MODEL_VERSIONS` / `MODEL_RETENTION_DAYS`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};
use crate::manager::VersionManager;
use crate::retention::RetentionPolicy;
use crate::store::sled_store::SledStoreOptions;
use crate::store::{FsStore, SledStore, VersionStore};

/// A century; longer windows are almost certainly unit mistakes.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend { Fs, Sled }

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub service_name: String,
    pub base_dir: PathBuf,
    pub backend: StoreBackend,
    pub max_versions: usize,
    pub retention_days: u32,
    pub listen_port: u16,
}

pub fn load_config(service: &str) -> Result<RegistryConfig> {
    let mut builder = ::config::Config::builder()
        .set_default("service_name", service)?
        .set_default("base_dir", "models")?
        .set_default("backend", "fs")?
        .set_default("max_versions", 10_i64)?
        .set_default("retention_days", 30_i64)?
        .set_default("listen_port", 8085_i64)?;
    if let Ok(file) = std::env::var("MODELVAULT_CONFIG_FILE") {
        builder = builder.add_source(::config::File::with_name(&file).required(false));
    }
    builder = builder
        .add_source(::config::Environment::with_prefix("MODELVAULT").separator("__"))
        .set_override_option("base_dir", std::env::var("MODEL_DIR").ok())?
        .set_override_option("max_versions", std::env::var("MAX_MODEL_VERSIONS").ok())?
        .set_override_option("retention_days", std::env::var("MODEL_RETENTION_DAYS").ok())?;
    let cfg: RegistryConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_versions == 0 { return Err(RegistryError::Validation("max_versions must be at least 1".into())); }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(RegistryError::Validation(format!("retention_days {} exceeds {MAX_RETENTION_DAYS}", self.retention_days)));
        }
        Ok(())
    }

    pub fn retention_policy(&self) -> RetentionPolicy { RetentionPolicy::new(self.max_versions, self.retention_days) }

    pub fn open_store(&self) -> Result<Arc<dyn VersionStore>> {
        Ok(match self.backend {
            StoreBackend::Fs => Arc::new(FsStore::open(&self.base_dir)?),
            StoreBackend::Sled => Arc::new(SledStore::open(SledStoreOptions { path: Some(self.base_dir.join("registry.sled")), temporary: false })?),
        })
    }

    pub fn build_manager(&self) -> Result<VersionManager> { Ok(VersionManager::new(self.open_store()?, self.retention_policy())) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_env_and_legacy_overrides_layer_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("registry.yaml");
        std::fs::write(&file, "backend: sled\nmax_versions: 4\nretention_days: 7\n").unwrap();
        std::env::set_var("MODELVAULT_CONFIG_FILE", &file);
        std::env::set_var("MAX_MODEL_VERSIONS", "6");
        let cfg = load_config("model-registry").unwrap();
        std::env::remove_var("MODELVAULT_CONFIG_FILE");
        std::env::remove_var("MAX_MODEL_VERSIONS");
        assert_eq!(cfg.backend, StoreBackend::Sled);
        assert_eq!(cfg.max_versions, 6);
        assert_eq!(cfg.retention_days, 7);
        assert_eq!(cfg.service_name, "model-registry");
        assert_eq!(cfg.retention_policy(), RetentionPolicy::new(6, 7));
    }

    fn cfg(max_versions: usize, retention_days: u32) -> RegistryConfig {
        RegistryConfig { service_name: "t".into(), base_dir: "models".into(), backend: StoreBackend::Fs, max_versions, retention_days, listen_port: 0 }
    }

    #[test]
    fn zero_cap_is_rejected() {
        assert!(matches!(cfg(0, 30).validate(), Err(RegistryError::Validation(_))));
    }

    #[test]
    fn retention_window_is_bounded() {
        assert!(cfg(10, MAX_RETENTION_DAYS).validate().is_ok());
        assert!(matches!(cfg(10, MAX_RETENTION_DAYS + 1).validate(), Err(RegistryError::Validation(_))));
        assert!(matches!(cfg(10, 100_000_000).validate(), Err(RegistryError::Validation(_))));
    }
}
