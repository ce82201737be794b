//! Fan-out handler.
//!
//! Dispatches a list of sub-tasks concurrently, one tokio task each, and
//! joins them all before the step completes. Results are collected in
//! declaration order regardless of finish order. Siblings are not
//! cancelled when one fails — the join waits for every sub-task, so no
//! work keeps running past the step boundary; the first handler error,
//! if any, propagates after the join.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::actions::{ActionContext, ActionHandler};
use crate::error::{EngineError, Result};

/// Handler for `parallel` steps.
pub struct ParallelHandler;

#[async_trait]
impl ActionHandler for ParallelHandler {
    async fn handle(&self, config: &Value, ctx: &ActionContext) -> Result<Value> {
        let tasks = config
            .get("tasks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        debug!(count = tasks.len(), "fanning out sub-tasks");

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move { run_sub_task(task, &ctx).await }));
        }

        // join_all preserves input order, so results line up with the
        // declared task list.
        let joined = futures::future::join_all(handles).await;

        let mut results = Vec::with_capacity(joined.len());
        let mut first_error: Option<EngineError> = None;
        for outcome in joined {
            match outcome {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(EngineError::InvalidActionConfig {
                            action: "parallel",
                            reason: format!("sub-task panicked: {join_err}"),
                        });
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(json!({
            "status": "success",
            "results": results,
        }))
    }
}

async fn run_sub_task(task: Value, ctx: &ActionContext) -> Result<Value> {
    let task_type = task
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // An unknown sub-task type fills its slot with a failed result
    // instead of aborting the siblings.
    if !ctx.registry.contains(&task_type) {
        return Ok(json!({
            "status": "failed",
            "error": format!("unknown task type: {task_type}"),
        }));
    }

    let task_config = task
        .get("config")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    ctx.registry.dispatch(&task_type, &task_config, ctx).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
