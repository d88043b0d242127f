//! Error types for the core library.

use thiserror::Error;

use crate::task::{AccountId, TaskShape};

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The overlay namespace was not configured.
    #[error("Unknown overlay namespace: {0:?}")]
    UnknownNamespace(String),

    /// The account has not been activated in the task registry.
    #[error("Account not known to the task registry: {0}")]
    AccountNotFound(AccountId),

    /// No implementation is registered for the task type.
    #[error("No task implementation registered for {0:?}")]
    UnknownTaskType(String),

    /// A raw task that needs an account was issued without one.
    #[error("Task {0:?} requires an account id")]
    MissingAccount(String),

    /// Complex tasks cannot be registered globally.
    #[error("Complex task {0:?} cannot be registered as a global task")]
    ComplexGlobalTask(String),

    /// A marker was handed to a simple task or a planned task to a complex one.
    #[error("Task {task_type:?} executes {expected}, not {got}")]
    TaskShapeMismatch {
        /// The task type being executed.
        task_type: String,
        /// What the implementation consumes.
        expected: TaskShape,
        /// What was passed in.
        got: TaskShape,
    },

    /// The implementation provides no consult method.
    #[error("Task {0:?} has no consult method")]
    ConsultUnsupported(String),

    /// Persisted complex task state is malformed.
    #[error("Inconsistent persisted task state: {0}")]
    InconsistentState(String),

    /// The server location of an entity is unknown.
    #[error("No server location for {0:?}")]
    MissingLocation(String),

    /// The account does not know a folder.
    #[error("Unknown folder: {0}")]
    UnknownFolder(String),

    /// Network or protocol failure reported by an account.
    #[error("Remote error: {0}")]
    Remote(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
