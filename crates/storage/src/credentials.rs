//! Stored fal.ai API key.

use std::sync::Arc;

use crate::storage::{KeyValueStore, StorageError};

/// Storage key of the API key.
pub const CREDENTIAL_KEY: &str = "fal_api_key";

/// Number of trailing characters left visible by [`mask_credential`].
const VISIBLE_SUFFIX: usize = 4;

/// Reads and writes the API key in a [`KeyValueStore`].
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// The stored key, or `None` when absent or blank.
    pub fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .storage
            .get(CREDENTIAL_KEY)?
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty()))
    }

    /// Store `key` after trimming. Empty keys are rejected.
    pub fn save(&self, key: &str) -> Result<(), StorageError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(StorageError::EmptyCredential);
        }
        self.storage.set(CREDENTIAL_KEY, key)?;
        tracing::info!("Saved fal API key");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(CREDENTIAL_KEY)?;
        tracing::info!("Cleared fal API key");
        Ok(())
    }

    /// The stored key with all but the last few characters hidden.
    pub fn masked(&self) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.map(|key| mask_credential(&key)))
    }
}

/// Hide all but the last four characters of `key`.
pub fn mask_credential(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= VISIBLE_SUFFIX {
        return "*".repeat(chars.len().max(VISIBLE_SUFFIX));
    }
    let hidden = chars.len() - VISIBLE_SUFFIX;
    let suffix: String = chars[hidden..].iter().collect();
    format!("{}{}", "*".repeat(hidden), suffix)
}
