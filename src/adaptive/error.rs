use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("model runtime error: {0}")]
    Model(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },
}

#[cfg(feature = "neural")]
pub(crate) fn map_candle_err(e: candle_core::Error) -> EngineError {
    EngineError::Model(e.to_string())
}
