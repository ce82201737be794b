//! Notification handler.
//!
//! Success here is declarative: the handler records that a message was
//! dispatched to the named recipient, but actual delivery happens outside
//! this core's visibility.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::actions::{ActionContext, ActionHandler};
use crate::error::Result;

/// Handler for `send_email` steps.
pub struct NotifyHandler;

#[async_trait]
impl ActionHandler for NotifyHandler {
    async fn handle(&self, config: &Value, _ctx: &ActionContext) -> Result<Value> {
        let to = config.get("to").and_then(Value::as_str).unwrap_or_default();
        let subject = config
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or_default();

        info!(to, subject, "sending notification");

        Ok(json!({
            "status": "success",
            "sent_to": to,
            "subject": subject,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
