//! Development-only credential cache.
//!
//! Stands in for the browser's local storage: a flat key-value document in
//! which the credential bundle lives under [`DEV_CREDENTIAL_CACHE_KEY`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::auth::CredentialBundle;

pub const DEV_CREDENTIAL_CACHE_KEY: &str = "nrm.dev.credential_bundle";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("credential cache io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential cache contents are invalid: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait CredentialCache: Send + Sync {
    fn load(&self) -> Result<Option<CredentialBundle>, CacheError>;
    fn persist(&self, bundle: &CredentialBundle) -> Result<(), CacheError>;
    fn clear(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialCache {
    entry: Mutex<Option<String>>,
}

impl MemoryCredentialCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialCache for MemoryCredentialCache {
    fn load(&self) -> Result<Option<CredentialBundle>, CacheError> {
        let entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        entry
            .as_deref()
            .map(CredentialBundle::from_json)
            .transpose()
            .map_err(CacheError::from)
    }

    fn persist(&self, bundle: &CredentialBundle) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(bundle)?;
        *self.entry.lock().unwrap_or_else(PoisonError::into_inner) = Some(serialized);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        *self.entry.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// JSON document on disk. Keys other than the credential key are preserved.
#[derive(Debug, Clone)]
pub struct FileCredentialCache {
    path: PathBuf,
}

impl FileCredentialCache {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>, CacheError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(error) => return Err(error.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(document)?;
        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, serialized)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl CredentialCache for FileCredentialCache {
    fn load(&self) -> Result<Option<CredentialBundle>, CacheError> {
        let document = self.read_document()?;
        document
            .get(DEV_CREDENTIAL_CACHE_KEY)
            .filter(|value| !value.is_null())
            .cloned()
            .map(serde_json::from_value::<CredentialBundle>)
            .transpose()
            .map_err(CacheError::from)
    }

    fn persist(&self, bundle: &CredentialBundle) -> Result<(), CacheError> {
        let mut document = self.read_document()?;
        document.insert(
            DEV_CREDENTIAL_CACHE_KEY.to_string(),
            serde_json::to_value(bundle)?,
        );
        self.write_document(&document)
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut document = self.read_document()?;
        if document.remove(DEV_CREDENTIAL_CACHE_KEY).is_none() {
            return Ok(());
        }
        self.write_document(&document)
    }
}
