//! Action registry and the built-in step handlers.
//!
//! A step's `type` string selects a handler from the registry; handlers
//! share the uniform contract `handle(config, ctx) -> Result<Value>`. By
//! convention a handler result is a map carrying a `status` field —
//! `"failed"` aborts the run. The registry is built once at engine
//! construction and shared read-only; an unknown type at dispatch is a
//! configuration error, not a fallback path.

pub mod analyze;
pub mod conditional;
pub mod delegate;
pub mod notify;
pub mod parallel;
pub mod remote_call;
pub mod transform;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use docflow_agent::Delegate;

use crate::error::{EngineError, Result};

pub use analyze::AnalyzeHandler;
pub use conditional::ConditionalHandler;
pub use delegate::DelegateHandler;
pub use notify::NotifyHandler;
pub use parallel::ParallelHandler;
pub use remote_call::RemoteCallHandler;
pub use transform::TransformHandler;

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// The execution context a handler sees.
///
/// Cheap to clone: a snapshot of the run's accumulated `state` plus the
/// registry handle that lets branching and fan-out handlers dispatch
/// sub-steps recursively.
#[derive(Clone)]
pub struct ActionContext {
    /// The run's state at the time the step started.
    pub state: Map<String, Value>,
    /// Registry for recursive dispatch (conditional branches, fan-out
    /// sub-tasks).
    pub registry: Arc<ActionRegistry>,
}

/// A step-type implementation.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute the step. `config` arrives with templates already
    /// resolved. Returning `Err` aborts the run, as does an `Ok` result
    /// whose `status` field is `"failed"`.
    async fn handle(&self, config: &Value, ctx: &ActionContext) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Static lookup table from step-type strings to handlers.
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// An empty registry. Used by tests that install their own handlers.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The built-in handler set.
    ///
    /// `delegate` wires the agent-backed handlers; without one they
    /// degrade to simulated results instead of calling out.
    pub fn builtin(delegate: Option<Arc<dyn Delegate>>) -> Self {
        let mut registry = Self::new();

        // Remote call answers both keys: a webhook is an api_call with
        // different intent.
        let remote: Arc<dyn ActionHandler> = Arc::new(RemoteCallHandler::new());
        registry.register("api_call", Arc::clone(&remote));
        registry.register("webhook", remote);

        registry.register("agent_task", Arc::new(DelegateHandler::new(delegate.clone())));
        registry.register("analyze", Arc::new(AnalyzeHandler::new(delegate)));
        registry.register("send_email", Arc::new(NotifyHandler));
        registry.register("data_transform", Arc::new(TransformHandler));
        registry.register("conditional", Arc::new(ConditionalHandler));
        registry.register("parallel", Arc::new(ParallelHandler));

        registry
    }

    /// Register (or replace) a handler for a step type.
    pub fn register(&mut self, step_type: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(step_type.into(), handler);
    }

    /// Whether a handler is registered for `step_type`.
    pub fn contains(&self, step_type: &str) -> bool {
        self.handlers.contains_key(step_type)
    }

    /// Registered step types, sorted.
    pub fn step_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Dispatch a step to its handler.
    pub async fn dispatch(
        &self,
        step_type: &str,
        config: &Value,
        ctx: &ActionContext,
    ) -> Result<Value> {
        let handler = self
            .handlers
            .get(step_type)
            .ok_or_else(|| EngineError::UnknownStepType {
                step_type: step_type.to_string(),
            })?;
        handler.handle(config, ctx).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Read a required string field out of a handler config.
pub(crate) fn required_str<'a>(
    config: &'a Value,
    action: &'static str,
    field: &'static str,
) -> Result<&'a str> {
    config
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::InvalidActionConfig {
            action,
            reason: format!("missing required string field `{field}`"),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn test_ctx(registry: Arc<ActionRegistry>) -> ActionContext {
        ActionContext {
            state: Map::new(),
            registry,
        }
    }

    #[tokio::test]
    async fn dispatch_unknown_type_is_an_error() {
        let registry = Arc::new(ActionRegistry::builtin(None));
        let ctx = test_ctx(Arc::clone(&registry));

        let result = registry.dispatch("no_such_type", &json!({}), &ctx).await;
        assert!(matches!(
            result,
            Err(EngineError::UnknownStepType { step_type }) if step_type == "no_such_type"
        ));
    }

    #[test]
    fn builtin_registry_covers_all_step_types() {
        let registry = ActionRegistry::builtin(None);
        for step_type in [
            "api_call",
            "webhook",
            "agent_task",
            "analyze",
            "send_email",
            "data_transform",
            "conditional",
            "parallel",
        ] {
            assert!(registry.contains(step_type), "missing {step_type}");
        }
    }

    #[test]
    fn required_str_reports_missing_field() {
        let err = required_str(&json!({}), "api_call", "url").unwrap_err();
        assert!(matches!(err, EngineError::InvalidActionConfig { .. }));
    }
}
