//! The studio facade: describe, validate, generate, record.

use std::sync::Arc;

use fluxstudio_core::error::CoreError;
use fluxstudio_core::models::ModelRegistry;
use fluxstudio_core::validation::{validate_submission, ValidationError};
use fluxstudio_fal::{
    FalQueueTransport, GenerationClient, GenerationError, ProgressCallback, RemedialAction,
};
use fluxstudio_storage::{
    CredentialStore, FileStore, HistoryItem, HistoryStore, KeyValueStore, StorageError,
};
use serde_json::Value;
use uuid::Uuid;

use crate::config::StudioConfig;

/// Everything that can stop a submission.
#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The studio could not be assembled (bad registry, HTTP client setup).
    #[error("Setup failed: {0}")]
    Setup(String),
}

impl From<CoreError> for StudioError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ModelNotFound { id } => StudioError::ModelNotFound(id),
            CoreError::Validation(e) => StudioError::Validation(e),
            CoreError::InvalidRegistry(msg) => StudioError::Setup(msg),
        }
    }
}

impl StudioError {
    /// Short message suitable for showing to a user.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// A follow-up action, for failures the user can fix on their account.
    pub fn remedy(&self) -> Option<RemedialAction> {
        match self {
            StudioError::Generation(e) => e.remedy(),
            _ => None,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            StudioError::ModelNotFound(_) => "MODEL_NOT_FOUND",
            StudioError::Validation(_) => "VALIDATION_ERROR",
            StudioError::Generation(e) => e.code(),
            StudioError::Storage(_) => "STORAGE_ERROR",
            StudioError::Setup(_) => "SETUP_ERROR",
        }
    }
}

/// Registry, client, history and stored credential behind one handle.
pub struct Studio {
    registry: ModelRegistry,
    client: GenerationClient,
    history: Arc<HistoryStore>,
    credentials: CredentialStore,
}

impl Studio {
    pub fn new(
        registry: ModelRegistry,
        client: GenerationClient,
        history: Arc<HistoryStore>,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            registry,
            client,
            history,
            credentials,
        }
    }

    /// Assemble a studio backed by the fal queue and the on-disk data
    /// directory named in `config`.
    pub fn open(config: &StudioConfig) -> Result<Self, StudioError> {
        let storage: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(config.data_dir.clone())?);
        let transport = FalQueueTransport::new(config.queue_config())
            .map_err(|e| StudioError::Setup(e.to_string()))?;
        let client =
            GenerationClient::new(Arc::new(transport)).with_retry(config.retry_config());
        let history = HistoryStore::open(Arc::clone(&storage), config.history_config())?;

        tracing::info!(
            data_dir = %config.data_dir.display(),
            history_items = history.len(),
            queue_url = %config.queue_url,
            "Studio ready",
        );

        Ok(Self::new(
            ModelRegistry::builtin(),
            client,
            Arc::new(history),
            CredentialStore::new(storage),
        ))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Validate `bag`, run the generation and record it in history.
    ///
    /// Nothing is recorded when any step fails.
    pub async fn submit(
        &self,
        bag: &Value,
        credential: &str,
        progress: Option<&ProgressCallback<'_>>,
    ) -> Result<HistoryItem, StudioError> {
        let request = validate_submission(&self.registry, bag)?;
        let descriptor = self.registry.describe(&request.model_id)?;

        tracing::info!(
            model_id = %descriptor.id,
            image_count = request.image_count,
            "Submitting generation",
        );

        let result = self
            .client
            .generate(descriptor, &request, credential, progress)
            .await?;

        let item = HistoryItem::from_generation(descriptor, &request, &result);
        self.history.append(item.clone())?;
        Ok(item)
    }

    /// The parameter bag of a history item, ready to resubmit.
    pub fn remix(&self, id: Uuid) -> Option<Value> {
        self.history.get(id).map(|item| item.remix_bag())
    }
}

/// Pick the credential to use: explicit flag, then stored key, then
/// environment.
pub fn resolve_credential(
    flag: Option<&str>,
    stored: Option<String>,
    env: Option<&str>,
) -> Option<String> {
    let non_blank = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
    flag.and_then(non_blank)
        .or_else(|| stored.as_deref().and_then(non_blank))
        .or_else(|| env.and_then(non_blank))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_precedence() {
        assert_eq!(
            resolve_credential(Some("flag"), Some("stored".into()), Some("env")).as_deref(),
            Some("flag")
        );
        assert_eq!(
            resolve_credential(Some("  "), Some("stored".into()), Some("env")).as_deref(),
            Some("stored")
        );
        assert_eq!(resolve_credential(None, None, Some("env")).as_deref(), Some("env"));
        assert_eq!(resolve_credential(None, None, None), None);
    }

    #[test]
    fn core_errors_map_to_studio_errors() {
        let err = StudioError::from(CoreError::ModelNotFound { id: "nope".into() });
        assert_eq!(err.code(), "MODEL_NOT_FOUND");
        let err = StudioError::from(CoreError::Validation(ValidationError::EmptyPrompt));
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn remedy_comes_from_generation_errors() {
        let err = StudioError::from(GenerationError::from_status(402, None));
        assert!(err.remedy().is_some());
        assert_eq!(err.code(), "INSUFFICIENT_CREDITS");
        assert!(StudioError::ModelNotFound("x".into()).remedy().is_none());
    }
}
