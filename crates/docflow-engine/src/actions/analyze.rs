//! Analyze handler — free-form "look at this state" steps.
//!
//! Behaviorally a sibling of the delegate handler: the prompt and data go
//! to the external agent, which answers with a structured analysis. The
//! schema keeps the reply parseable; the agent crate degrades to null if
//! the agent answers with prose anyway.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use docflow_agent::{AnalyzeRequest, Delegate};

use crate::actions::{ActionContext, ActionHandler, required_str};
use crate::error::Result;

/// Handler for `analyze` steps.
pub struct AnalyzeHandler {
    delegate: Option<Arc<dyn Delegate>>,
}

impl AnalyzeHandler {
    pub fn new(delegate: Option<Arc<dyn Delegate>>) -> Self {
        Self { delegate }
    }
}

/// Shape requested from the agent for every analysis step.
fn analysis_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "insights": {"type": "array", "items": {"type": "string"}},
            "recommendations": {"type": "array", "items": {"type": "string"}},
            "confidence": {"type": "number"}
        }
    })
}

#[async_trait]
impl ActionHandler for AnalyzeHandler {
    async fn handle(&self, config: &Value, _ctx: &ActionContext) -> Result<Value> {
        let prompt = required_str(config, "analyze", "prompt")?;

        let data = config.get("data").cloned().unwrap_or(Value::Null);
        let data_text = match &data {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        };

        if let Some(delegate) = &self.delegate {
            info!(prompt_prefix = truncate(prompt, 80), "requesting agent analysis");

            let request =
                AnalyzeRequest::new(data_text, prompt).with_schema(analysis_schema());
            match delegate.analyze(&request).await {
                Ok(analysis) => {
                    return Ok(json!({
                        "status": "success",
                        "analysis": analysis,
                    }));
                }
                Err(e) => {
                    warn!(error = %e, "agent analysis failed, using simulated fallback");
                }
            }
        } else {
            warn!("no agent delegate configured, simulating analysis");
        }

        Ok(json!({
            "status": "simulated",
            "analysis": {
                "summary": format!("Analysis simulation for: {}", truncate(prompt, 50)),
                "insights": ["agent service required for real analysis"],
                "recommendations": ["configure an agent endpoint for full functionality"],
                "confidence": 0.0,
            },
            "warning": "agent service not available; analysis was simulated",
        }))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
