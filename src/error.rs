//! Error types for agent-dispatch.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid task specification: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
}

impl Error {
    /// True when the shared store could not be reached.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable(_)))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A malformed task specification. Nothing is written when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("maxRetries {value} exceeds the allowed maximum of {max}")]
    TooManyRetries { value: u32, max: u32 },

    #[error("task {index} in batch: {source}")]
    InBatch {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

/// Shared queue / record store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tool invocation infrastructure errors.
///
/// A tool that runs and reports a failure is not an error at this level; it is
/// captured on the call's result instead.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Tool service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Failure of one task attempt while RUNNING. Drives retry-or-fail.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("tool invocation failed: {0}")]
    Tool(#[from] ToolError),
}

/// Executor-level errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Definition for agent {got} cannot be applied to the executor for {expected}")]
    DefinitionMismatch { expected: String, got: String },

    #[error("Task {id} belongs to agent {task_agent}, not {agent_id}")]
    WrongAgent {
        id: Uuid,
        task_agent: String,
        agent_id: String,
    },
}

/// Result type alias for the dispatcher.
pub type Result<T> = std::result::Result<T, Error>;
