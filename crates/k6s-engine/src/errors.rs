use crate::signing::SigningError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] k6s_store::StoreError),

    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("boundary pattern error: {0}")]
    Glob(#[from] globset::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session already active: {0}")]
    SessionAlreadyActive(String),
}
