//! Engine error types

use thiserror::Error;

use moesplit_client::ClientError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("split buffer poisoned by earlier transport error on {endpoint}")]
    Poisoned { endpoint: String },

    #[error("unknown tensor '{0}' in split buffer")]
    UnknownTensor(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
