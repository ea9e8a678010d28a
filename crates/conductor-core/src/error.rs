use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    // Node-agent errors
    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Argument validation failed for prompt {prompt}: {message}")]
    ArgumentValidation { prompt: String, message: String },

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    // Heap errors
    #[error("Specialist {specialist} failed: {message}")]
    Specialist { specialist: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConductorError>;
