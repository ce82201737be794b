//! Engine error types.
//!
//! Lookup and validation errors are raised before any step runs;
//! step-level failures are converted by the engine into a terminal
//! `Failed` run instead of propagating (see `engine`).

use std::path::PathBuf;

/// Unified error type for the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- pre-execution errors -------------------------------------------------
    /// The requested definition is not registered. Callers are expected
    /// to resolve the name through the matcher first.
    #[error("workflow not found: {name}")]
    DefinitionNotFound { name: String },

    /// A required parameter is missing.
    #[error("required parameter `{parameter}` not provided")]
    MissingParameter { parameter: String },

    /// A supplied parameter has the wrong runtime type.
    #[error("parameter `{parameter}` must be a {expected}")]
    ParameterType {
        parameter: String,
        expected: &'static str,
    },

    // -- step errors ----------------------------------------------------------
    /// A step declares a type with no registered handler.
    #[error("unknown step type: {step_type}")]
    UnknownStepType { step_type: String },

    /// A handler's config is missing or malformed beyond what the handler
    /// can degrade around.
    #[error("invalid config for `{action}` step: {reason}")]
    InvalidActionConfig {
        action: &'static str,
        reason: String,
    },

    // -- definition loading ---------------------------------------------------
    /// The workflow definition directory could not be read at all.
    /// Individual bad files are logged and skipped, never raised.
    #[error("failed to read workflow directory {path}: {source}")]
    DefinitionDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -- upstream crate errors ------------------------------------------------
    /// An error propagated from the persistence layer.
    #[error("store error: {0}")]
    Store(#[from] docflow_store::StoreError),

    /// An error propagated from the agent delegate boundary.
    #[error("agent error: {0}")]
    Agent(#[from] docflow_agent::AgentError),
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;
