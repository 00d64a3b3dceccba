//! Persisted record of the externally registered backend address.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry record is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// What a registration stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredEndpoint {
    pub address: String,
    pub registered_at: DateTime<Utc>,
}

impl RegisteredEndpoint {
    pub fn now(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            registered_at: Utc::now(),
        }
    }
}

/// Storage for the single registered address.
#[async_trait]
pub trait EndpointRegistry: Send + Sync {
    /// The last registered address; `Ok(None)` when nothing was ever
    /// registered.
    async fn load(&self) -> Result<Option<RegisteredEndpoint>, RegistryError>;

    async fn store(&self, record: &RegisteredEndpoint) -> Result<(), RegistryError>;
}

/// JSON file registry. Writes go through a temp file and a rename so a
/// crash never leaves a half-written record.
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl EndpointRegistry for FileRegistry {
    async fn load(&self) -> Result<Option<RegisteredEndpoint>, RegistryError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, record: &RegisteredEndpoint) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-process registry for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryRegistry {
    record: Mutex<Option<RegisteredEndpoint>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            record: Mutex::new(Some(RegisteredEndpoint::now(address))),
        }
    }
}

#[async_trait]
impl EndpointRegistry for MemoryRegistry {
    async fn load(&self) -> Result<Option<RegisteredEndpoint>, RegistryError> {
        Ok(self.record.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn store(&self, record: &RegisteredEndpoint) -> Result<(), RegistryError> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        Ok(())
    }
}
