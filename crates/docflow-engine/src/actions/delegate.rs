//! Delegate handler — forwards a task bundle to the external agent.
//!
//! The agent is the only source of intelligence in the system; this
//! handler treats it as opaque. Without a configured delegate (or when
//! the call fails) the step degrades to a `simulated` result so that
//! workflows remain runnable offline.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use docflow_agent::{Delegate, TaskRequest};

use crate::actions::{ActionContext, ActionHandler};
use crate::error::Result;

/// Handler for `agent_task` steps.
pub struct DelegateHandler {
    delegate: Option<Arc<dyn Delegate>>,
}

impl DelegateHandler {
    pub fn new(delegate: Option<Arc<dyn Delegate>>) -> Self {
        Self { delegate }
    }
}

#[async_trait]
impl ActionHandler for DelegateHandler {
    async fn handle(&self, config: &Value, _ctx: &ActionContext) -> Result<Value> {
        let agent = config
            .get("agent_name")
            .and_then(Value::as_str)
            .unwrap_or("general-purpose")
            .to_string();
        let action = config
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = config.get("params").cloned().unwrap_or_else(|| json!({}));

        if let Some(delegate) = &self.delegate {
            info!(agent, action, "delegating task to agent");

            let request = TaskRequest {
                agent: agent.clone(),
                action: action.clone(),
                params,
            };
            match delegate.execute_task(&request).await {
                Ok(result) => {
                    info!(agent, "agent task completed");
                    return Ok(result);
                }
                Err(e) => {
                    warn!(agent, error = %e, "agent task failed, using simulated fallback");
                }
            }
        } else {
            warn!(agent, action, "no agent delegate configured, simulating task");
        }

        Ok(simulated(&agent, &action))
    }
}

fn simulated(agent: &str, action: &str) -> Value {
    json!({
        "status": "simulated",
        "agent": agent,
        "action": action,
        "result": format!("Simulated execution of {action} (agent service required for real execution)"),
        "warning": "agent service not available; task was simulated",
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
