//! Request types crossing the delegate boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A task forwarded to a named agent.
///
/// The engine treats the triple as opaque — it is rendered into a prompt
/// on the far side of the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Agent to delegate to (e.g. "quality-engineer").
    pub agent: String,
    /// What the agent should do.
    pub action: String,
    /// Structured parameters for the action.
    pub params: Value,
}

/// A free-form analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    /// The material to analyze.
    pub text: String,
    /// Instructions for the analysis.
    pub prompt: String,
    /// Optional JSON Schema the reply should conform to. When set, the
    /// reply is parsed best-effort and validated; on failure the caller
    /// receives a neutral `null` rather than an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl AnalyzeRequest {
    /// Build a plain-text analysis request.
    pub fn new(text: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prompt: prompt.into(),
            schema: None,
        }
    }

    /// Request a structured reply conforming to `schema`.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}
