//! Data transform handler.
//!
//! Evaluates named template expressions against the run's current state
//! to derive new scalar values. Failures are isolated per key: a single
//! bad expression yields `null` for that key, never a failed step.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::actions::{ActionContext, ActionHandler};
use crate::error::Result;
use crate::template;

/// Handler for `data_transform` steps.
pub struct TransformHandler;

#[async_trait]
impl ActionHandler for TransformHandler {
    async fn handle(&self, config: &Value, ctx: &ActionContext) -> Result<Value> {
        let transformations = config
            .get("transformations")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        // Expressions see the state entries at top level plus the whole
        // map under `state`.
        let mut render_ctx: Map<String, Value> = ctx.state.clone();
        render_ctx.insert("state".into(), Value::Object(ctx.state.clone()));

        let mut transformed = Map::new();
        for (key, expression) in transformations {
            let value = match expression {
                Value::String(expr) => match template::render(&expr, &render_ctx) {
                    Some(rendered) => Value::String(rendered),
                    None => {
                        debug!(key, "transform expression failed, yielding null");
                        Value::Null
                    }
                },
                // Non-string expressions pass through as literals.
                other => other,
            };
            transformed.insert(key, value);
        }

        Ok(json!({
            "status": "success",
            "transformed": transformed,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use std::sync::Arc;

    fn ctx_with_state(state: Value) -> ActionContext {
        ActionContext {
            state: state.as_object().cloned().unwrap_or_default(),
            registry: Arc::new(ActionRegistry::new()),
        }
    }

    #[tokio::test]
    async fn renders_expressions_against_state() {
        let ctx = ctx_with_state(json!({"document_type": "nda", "score": 3}));
        let config = json!({"transformations": {
            "label": "type={{ document_type }}",
            "via_state": "{{ state.score }}",
        }});

        let result = TransformHandler.handle(&config, &ctx).await.unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["transformed"]["label"], "type=nda");
        assert_eq!(result["transformed"]["via_state"], "3");
    }

    #[tokio::test]
    async fn failing_expression_yields_null_not_failure() {
        let ctx = ctx_with_state(json!({"present": "yes"}));
        let config = json!({"transformations": {
            "good": "{{ present }}",
            "bad": "{{ missing.path }}",
        }});

        let result = TransformHandler.handle(&config, &ctx).await.unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["transformed"]["good"], "yes");
        assert_eq!(result["transformed"]["bad"], Value::Null);
    }

    #[tokio::test]
    async fn plain_strings_and_literals_pass_through() {
        let ctx = ctx_with_state(json!({}));
        let config = json!({"transformations": {
            "text": "constant",
            "count": 7,
        }});

        let result = TransformHandler.handle(&config, &ctx).await.unwrap();
        assert_eq!(result["transformed"]["text"], "constant");
        assert_eq!(result["transformed"]["count"], 7);
    }

    #[tokio::test]
    async fn missing_transformations_key_is_empty_success() {
        let ctx = ctx_with_state(json!({}));
        let result = TransformHandler.handle(&json!({}), &ctx).await.unwrap();
        assert_eq!(result["status"], "success");
        assert!(result["transformed"].as_object().unwrap().is_empty());
    }
}
