//! Bearer credential slot used by the request executor.

use serde_json::{Map, Value};
use std::{fs, io::ErrorKind, path::PathBuf, sync::RwLock};
use thiserror::Error;
use tracing::warn;

/// Fixed storage key the bearer token lives under
pub const CREDENTIAL_STORAGE_KEY: &str = "relay.authToken";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential storage is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// A single optional bearer token. Absent means unauthenticated.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, token: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// Process-local slot
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn set(&self, token: &str) -> Result<(), StoreError> {
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token.to_string());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        if let Ok(mut slot) = self.token.write() {
            *slot = None;
        }
        Ok(())
    }
}

/// Token persisted in a JSON object file under [`CREDENTIAL_STORAGE_KEY`].
///
/// Other keys in the file are left untouched so the file can be shared with
/// other client state.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Map<String, Value>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(entries)?)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<String> {
        match self.load() {
            Ok(entries) => entries
                .get(CREDENTIAL_STORAGE_KEY)
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable credential storage");
                None
            }
        }
    }

    fn set(&self, token: &str) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        entries.insert(
            CREDENTIAL_STORAGE_KEY.to_string(),
            Value::String(token.to_string()),
        );
        self.save(&entries)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        if entries.remove(CREDENTIAL_STORAGE_KEY).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}
