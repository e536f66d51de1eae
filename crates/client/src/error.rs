//! Client error types

use thiserror::Error;

/// Structured failures from one endpoint connection.
///
/// Every variant names the endpoint so a failed model load or dispatch can
/// be traced to the machine that caused it.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error on {endpoint}: {detail}")]
    Transport { endpoint: String, detail: String },

    #[error("remote out of memory on {endpoint}: {detail}")]
    RemoteOom { endpoint: String, detail: String },

    #[error("protocol mismatch with {endpoint}: {detail}")]
    ProtocolMismatch { endpoint: String, detail: String },

    #[error("remote compute failed on {endpoint}: {detail}")]
    RemoteCompute { endpoint: String, detail: String },
}

impl ClientError {
    /// True for errors that leave the connection in an unusable state
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport { .. })
    }

    /// The endpoint this error originated from
    pub fn endpoint(&self) -> &str {
        match self {
            ClientError::Transport { endpoint, .. }
            | ClientError::RemoteOom { endpoint, .. }
            | ClientError::ProtocolMismatch { endpoint, .. }
            | ClientError::RemoteCompute { endpoint, .. } => endpoint,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
