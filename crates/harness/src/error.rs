//! Harness error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] moesplit_protocol::ProtocolError),

    #[error("Client error: {0}")]
    Client(#[from] moesplit_client::ClientError),

    #[error("Engine error: {0}")]
    Engine(#[from] moesplit_engine::EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
