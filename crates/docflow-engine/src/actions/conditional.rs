//! Conditional branch handler.
//!
//! Renders a boolean expression against the run state and dispatches
//! exactly one of two embedded sub-step configurations — never both.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::actions::{ActionContext, ActionHandler, required_str};
use crate::error::Result;
use crate::template;

/// Handler for `conditional` steps.
pub struct ConditionalHandler;

#[async_trait]
impl ActionHandler for ConditionalHandler {
    async fn handle(&self, config: &Value, ctx: &ActionContext) -> Result<Value> {
        let condition = required_str(config, "conditional", "condition")?;

        let mut render_ctx = Map::new();
        render_ctx.insert("state".into(), Value::Object(ctx.state.clone()));

        let rendered = template::render(condition, &render_ctx).unwrap_or_default();
        let truthy = rendered.eq_ignore_ascii_case("true") || rendered == "1";

        debug!(condition, rendered, truthy, "conditional evaluated");

        let branch = if truthy {
            config.get("if_true")
        } else {
            config.get("if_false")
        };
        let branch = branch.cloned().unwrap_or_else(|| json!({}));

        // Dispatch the branch if it names a registered step type;
        // otherwise just report which way the condition went.
        if let Some(branch_type) = branch.get("type").and_then(Value::as_str)
            && ctx.registry.contains(branch_type)
        {
            let branch_config = branch.get("config").cloned().unwrap_or_else(|| json!({}));
            return ctx.registry.dispatch(branch_type, &branch_config, ctx).await;
        }

        Ok(json!({
            "status": "success",
            "branch_taken": if truthy { "true" } else { "false" },
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
