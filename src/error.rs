use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("Conflicting task in flight for resource: {0}")]
    Conflict(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Execution timed out after {0}s")]
    Timeout(u64),

    #[error("Dispatcher is shut down")]
    Shutdown,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
