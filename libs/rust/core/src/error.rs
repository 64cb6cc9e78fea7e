//! Error taxonomy shared by the stores and the version manager.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found: {0}")] NotFound(String),
    #[error("forbidden: {0}")] Forbidden(String),
    #[error("storage error: {0}")] Storage(String),
    #[error("validation error: {0}")] Validation(String),
}

impl RegistryError {
    pub fn not_found(what: impl Into<String>) -> Self { Self::NotFound(what.into()) }
    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound(_)) }
}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self { Self::Storage(e.to_string()) }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self { Self::Storage(format!("serde: {e}")) }
}

impl From<sled::Error> for RegistryError {
    fn from(e: sled::Error) -> Self { Self::Storage(format!("sled: {e}")) }
}

impl From<::config::ConfigError> for RegistryError {
    fn from(e: ::config::ConfigError) -> Self { Self::Validation(format!("config: {e}")) }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
