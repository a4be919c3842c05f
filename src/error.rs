//! Error types for the stock query agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Startup
    // =============================

    #[error("Config error: {0}")]
    ConfigError(String),

    // =============================
    // Tool Boundary
    // =============================

    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool invocation error: {0}")]
    ToolInvocationError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    // =============================
    // Generation Boundary
    // =============================

    #[error("Generation error: {0}")]
    GenerationError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
