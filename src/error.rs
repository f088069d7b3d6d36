//! Top-level error types for Ventabot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading and validation errors.
///
/// These are detected before any buffering or sending happens and reported
/// as structured rejections to the caller of the entry point.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Buffer and claim-lock errors.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("buffer {id} not found")]
    NotFound { id: String },

    #[error("buffer manager is stopped")]
    Stopped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider request failed: {0}")]
    ProviderRequest(String),

    #[error("provider returned malformed response: {0}")]
    MalformedResponse(String),

    #[error("completion failed: {0}")]
    CompletionFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Tool dispatch and execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Delivery pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to send text to {target}: {reason}")]
    TextSend { target: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
