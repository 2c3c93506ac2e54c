use thiserror::Error;

/// Errors raised while transferring control between agents or assistants.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Invalid transfer arguments: {0}")]
    InvalidArguments(String),

    #[error("Target assistant not found: {0}")]
    AssistantNotFound(String),

    #[error("Failed to transfer context: {0}")]
    ContextTransfer(String),

    #[error("Thread error: {0}")]
    Thread(String),

    #[error("Message error: {0}")]
    Message(String),
}

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Cannot stringify function result: {0}")]
    Classification(String),

    #[error("Run error: {0}")]
    Run(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SwarmError>;
