//! HTTP delegate client.
//!
//! Talks to an agent service that accepts a task or analysis request and
//! replies with `{"output": "<text>"}`. The output may be plain prose,
//! bare JSON, or JSON wrapped in a markdown code fence — the client
//! normalizes all three.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};
use crate::types::{AnalyzeRequest, TaskRequest};

/// Default per-call deadline. The external agent process can hang for
/// minutes, so every call carries its own timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The seam between the workflow core and the external agent.
///
/// Implemented by [`DelegateClient`] for production and by scripted fakes
/// in tests. All methods are suspension points and may take a long time.
#[async_trait]
pub trait Delegate: Send + Sync {
    /// Forward a task to a named agent and return its structured result.
    async fn execute_task(&self, request: &TaskRequest) -> AgentResult<Value>;

    /// Ask the agent to analyze text, optionally into a schema-shaped
    /// value. Returns `Value::Null` when a structured reply was requested
    /// but could not be recovered from the agent's output.
    async fn analyze(&self, request: &AnalyzeRequest) -> AgentResult<Value>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to the agent service.
#[derive(Debug, Clone)]
pub struct DelegateConfig {
    /// Base URL of the agent service (e.g. `http://localhost:8700`).
    pub base_url: String,
    /// Per-call deadline.
    pub timeout: Duration,
}

impl DelegateConfig {
    /// Configuration with the default 120 s deadline.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP-backed [`Delegate`] implementation.
pub struct DelegateClient {
    config: DelegateConfig,
    http: reqwest::Client,
}

impl DelegateClient {
    /// Create a client for the configured agent service.
    pub fn new(config: DelegateConfig) -> AgentResult<Self> {
        url::Url::parse(&config.base_url).map_err(|e| AgentError::InvalidEndpoint {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("docflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, http })
    }

    /// POST `body` to `path` and return the agent's raw text output.
    async fn post(&self, path: &str, body: &Value) -> AgentResult<String> {
        let url = format!("{}{path}", self.config.base_url.trim_end_matches('/'));
        let timeout_secs = self.config.timeout.as_secs();

        debug!(url = %url, timeout_secs, "calling agent service");

        let response = self
            .http
            .post(&url)
            .timeout(self.config.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout {
                        seconds: timeout_secs,
                    }
                } else {
                    AgentError::RequestFailed {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::RequestFailed {
                reason: format!("failed to read agent reply: {e}"),
            })?;

        if !status.is_success() {
            return Err(AgentError::Service {
                status: status.as_u16(),
                body: text,
            });
        }

        // The service wraps its output as {"output": "..."}; tolerate a
        // bare-text reply from older deployments.
        match serde_json::from_str::<Value>(&text) {
            Ok(v) => match v.get("output").and_then(|o| o.as_str()) {
                Some(output) => Ok(output.to_string()),
                None => Ok(text),
            },
            Err(_) => Ok(text),
        }
    }
}

#[async_trait]
impl Delegate for DelegateClient {
    async fn execute_task(&self, request: &TaskRequest) -> AgentResult<Value> {
        let body = json!({
            "agent": request.agent,
            "action": request.action,
            "params": request.params,
        });

        let output = self.post("/v1/tasks", &body).await?;

        // A task reply should be a JSON result map; prose is preserved so
        // the step output still records what the agent said.
        Ok(match extract_json(&output) {
            Some(value) => value,
            None => json!({ "status": "success", "output": output }),
        })
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> AgentResult<Value> {
        let body = json!({
            "text": request.text,
            "prompt": request.prompt,
            "schema": request.schema,
        });

        let output = self.post("/v1/analyze", &body).await?;

        let Some(schema) = &request.schema else {
            return Ok(Value::String(output));
        };

        // Structured reply requested: best-effort parse, then validate.
        // Either failure degrades to a neutral null — the agent emitting
        // prose instead of the requested structure must not abort a run.
        let Some(parsed) = extract_json(&output) else {
            warn!("agent reply was not parseable JSON, using neutral fallback");
            return Ok(Value::Null);
        };

        match jsonschema::JSONSchema::compile(schema) {
            Ok(validator) if !validator.is_valid(&parsed) => {
                warn!("agent reply did not match the requested schema, using neutral fallback");
                Ok(Value::Null)
            }
            Ok(_) => Ok(parsed),
            Err(e) => {
                // A broken schema is the caller's bug; the reply is still
                // returned since it parsed.
                warn!(error = %e, "requested schema does not compile, skipping validation");
                Ok(parsed)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reply normalization
// ---------------------------------------------------------------------------

/// Recover a JSON value from agent output.
///
/// Tries, in order: direct parse, markdown-code-fence stripping, and the
/// first `{...}` span in the text. Returns `None` if nothing parses.
pub fn extract_json(output: &str) -> Option<Value> {
    let trimmed = output.trim();

    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let unfenced = unfenced.strip_suffix("```").unwrap_or(unfenced).trim();
    if let Ok(v) = serde_json::from_str(unfenced) {
        return Some(v);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
