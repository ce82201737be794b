//! Remote call handler — HTTP requests built from step config.
//!
//! Any HTTP completion is reported as `success` with the status code and
//! body attached; only transport failures (timeout, DNS, connection
//! refused) produce a `failed` result. There is no retry at this layer —
//! retry policy belongs to whoever invokes the engine.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::actions::{ActionContext, ActionHandler, required_str};
use crate::error::Result;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Handler for `api_call` and `webhook` steps.
pub struct RemoteCallHandler {
    client: reqwest::Client,
}

impl RemoteCallHandler {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("docflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for RemoteCallHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for RemoteCallHandler {
    async fn handle(&self, config: &Value, _ctx: &ActionContext) -> Result<Value> {
        let url = required_str(config, "api_call", "url")?;
        let method_str = config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET");
        let timeout_secs = config
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        // Everything past the config check degrades to a failed result
        // instead of aborting: a bad URL or method is indistinguishable,
        // to the run, from an unreachable endpoint.
        let Some(method) = parse_method(method_str) else {
            return Ok(failed(format!("unsupported HTTP method `{method_str}`")));
        };
        if let Err(e) = url::Url::parse(url) {
            return Ok(failed(format!("invalid URL `{url}`: {e}")));
        }

        debug!(method = method_str, url, timeout_secs, "executing remote call");

        let mut request = self
            .client
            .request(method, url)
            .timeout(Duration::from_secs(timeout_secs));

        if let Some(headers) = config.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(key.as_str(), v);
                }
            }
        }

        if let Some(query) = config.get("query_params").and_then(Value::as_object) {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect();
            request = request.query(&pairs);
        }

        if let Some(body) = config.get("body").filter(|b| !b.is_null()) {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(failed(e.to_string())),
        };

        let status_code = response.status().as_u16();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return Ok(failed(format!("failed to read response body: {e}"))),
        };

        let response_value = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        debug!(status_code, "remote call completed");

        Ok(json!({
            "status": "success",
            "status_code": status_code,
            "response": response_value,
        }))
    }
}

fn failed(error: String) -> Value {
    json!({ "status": "failed", "error": error })
}

fn parse_method(method: &str) -> Option<reqwest::Method> {
    match method.to_uppercase().as_str() {
        "GET" => Some(reqwest::Method::GET),
        "POST" => Some(reqwest::Method::POST),
        "PUT" => Some(reqwest::Method::PUT),
        "PATCH" => Some(reqwest::Method::PATCH),
        "DELETE" => Some(reqwest::Method::DELETE),
        "HEAD" => Some(reqwest::Method::HEAD),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
