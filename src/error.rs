use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChatError {
    #[error("Cannot reach the model server at {host}: {message}")]
    Connection { host: String, message: String },

    #[error("Model '{0}' is not available on the model server")]
    ModelNotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("The model server did not answer within {0} seconds")]
    Timeout(u64),

    #[error("Model server error: {0}")]
    Server(String),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    /// Stable identifier sent to the browser alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Connection { .. } => "connection",
            ChatError::ModelNotFound(_) => "model_not_found",
            ChatError::Validation(_) => "validation",
            ChatError::Timeout(_) => "timeout",
            ChatError::Server(_) => "server",
        }
    }
}
