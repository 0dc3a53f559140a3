//! Durable credential storage trait.

use std::sync::{Arc, Mutex};

use crate::error::StorageError;

/// Durable storage for the serialized credential.
///
/// The store owns encoding and decoding; a backend only keeps one opaque
/// string under its fixed key.
pub trait CredentialStorage: Send + Sync {
    /// Read the stored payload, if any.
    fn load(&self) -> Result<Option<String>, StorageError>;

    /// Replace the stored payload.
    fn save(&self, payload: &str) -> Result<(), StorageError>;

    /// Remove the stored payload. Removing nothing is not an error.
    fn remove(&self) -> Result<(), StorageError>;
}

/// In-process storage.
///
/// Clones share the same slot, so a store rebuilt from a clone sees what an
/// earlier store persisted, the way a restarted process sees its cookie jar.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with a raw payload.
    pub fn with_payload(payload: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(payload.into()))),
        }
    }

    /// The raw payload currently stored.
    pub fn payload(&self) -> Option<String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        // A poisoned slot still holds a whole string.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.lock().clone())
    }

    fn save(&self, payload: &str) -> Result<(), StorageError> {
        *self.lock() = Some(payload.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<(), StorageError> {
        *self.lock() = None;
        Ok(())
    }
}
