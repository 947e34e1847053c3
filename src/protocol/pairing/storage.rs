//! Credential records and their storage interface

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Long-term pairing credentials for one device relationship
///
/// Produced by a completed Pair-Setup and immutable afterwards; the engine
/// only reads it back for Pair-Verify. Removal is the owner's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Our Ed25519 long-term secret key
    pub ltsk: [u8; 32],
    /// Our Ed25519 long-term public key
    pub ltpk: [u8; 32],
    /// Our pairing identifier
    pub client_id: String,
    /// Device's Ed25519 long-term public key
    pub server_ltpk: [u8; 32],
    /// Device's pairing identifier
    pub server_id: String,
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Abstract storage interface for pairing credentials
///
/// Keyed by a caller-chosen device identifier.
#[async_trait]
pub trait CredentialStorage: Send + Sync {
    /// Load credentials for a device
    async fn load(&self, device_id: &str) -> Option<Credentials>;

    /// Save credentials for a device
    ///
    /// # Errors
    /// Returns error if storage fails
    async fn save(&mut self, device_id: &str, credentials: &Credentials)
    -> Result<(), StorageError>;

    /// Remove credentials for a device
    ///
    /// # Errors
    /// Returns error if removal fails
    async fn delete(&mut self, device_id: &str) -> Result<(), StorageError>;
}

/// In-memory credential storage, useful for tests and one-shot sessions
#[derive(Debug, Default)]
pub struct MemoryStorage {
    credentials: HashMap<String, Credentials>,
}

impl MemoryStorage {
    /// Create empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStorage for MemoryStorage {
    async fn load(&self, device_id: &str) -> Option<Credentials> {
        self.credentials.get(device_id).cloned()
    }

    async fn save(
        &mut self,
        device_id: &str,
        credentials: &Credentials,
    ) -> Result<(), StorageError> {
        self.credentials
            .insert(device_id.to_string(), credentials.clone());
        Ok(())
    }

    async fn delete(&mut self, device_id: &str) -> Result<(), StorageError> {
        self.credentials.remove(device_id);
        Ok(())
    }
}

/// JSON-file credential storage
///
/// The whole map is rewritten on every save; credential records are small
/// and saves are rare (once per first-time pairing).
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Create storage backed by the given file path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> Result<HashMap<String, Credentials>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, map: &HashMap<String, Credentials>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(map)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStorage for FileStorage {
    async fn load(&self, device_id: &str) -> Option<Credentials> {
        self.read_all().await.ok()?.remove(device_id)
    }

    async fn save(
        &mut self,
        device_id: &str,
        credentials: &Credentials,
    ) -> Result<(), StorageError> {
        let mut map = self.read_all().await?;
        map.insert(device_id.to_string(), credentials.clone());
        self.write_all(&map).await
    }

    async fn delete(&mut self, device_id: &str) -> Result<(), StorageError> {
        let mut map = self.read_all().await?;
        if map.remove(device_id).is_some() {
            self.write_all(&map).await?;
        }
        Ok(())
    }
}
