#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Engine(#[from] k6s_engine::EngineError),

    #[error(transparent)]
    Store(#[from] k6s_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
