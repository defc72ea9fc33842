//! Engine error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to start command '{id}': {source}")]
    Spawn {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{id}' has no {stream} pipe")]
    MissingPipe { id: String, stream: &'static str },

    #[error("failed to stop command '{id}': {source}")]
    Stop {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Identifier of the command the error belongs to.
    pub fn command_id(&self) -> &str {
        match self {
            EngineError::Spawn { id, .. }
            | EngineError::MissingPipe { id, .. }
            | EngineError::Stop { id, .. } => id,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
