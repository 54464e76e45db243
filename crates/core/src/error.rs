use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Model not found: {id}")]
    ModelNotFound { id: String },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid model registry: {0}")]
    InvalidRegistry(String),
}
