//! Workflow execution engine.
//!
//! Orchestrates one run: validates parameters, walks the steps in
//! declaration order, resolves templates, dispatches to the action
//! registry, records outputs, and transitions the run's status. The run
//! record is flushed on every step boundary — a hung handler (delegate
//! calls can take minutes) is still observable via `current_step`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use docflow_agent::Delegate;
use docflow_store::{RunStatus, RunStore, WorkflowRun};

use crate::actions::{ActionContext, ActionRegistry};
use crate::definition::{DefinitionStore, WorkflowDefinition};
use crate::error::{EngineError, Result};
use crate::template;

/// The workflow execution engine.
///
/// Holds the read-only definition store, the handler registry, and the
/// run store. One engine serves any number of concurrent runs; each run
/// advances through its own steps sequentially.
pub struct WorkflowEngine {
    definitions: Arc<DefinitionStore>,
    registry: Arc<ActionRegistry>,
    runs: RunStore,
}

impl WorkflowEngine {
    /// Engine with the built-in handlers and no agent delegate
    /// (delegate-backed steps return simulated results).
    pub fn new(definitions: Arc<DefinitionStore>, runs: RunStore) -> Self {
        Self::with_registry(definitions, runs, Arc::new(ActionRegistry::builtin(None)))
    }

    /// Engine with the built-in handlers wired to an agent delegate.
    pub fn with_delegate(
        definitions: Arc<DefinitionStore>,
        runs: RunStore,
        delegate: Arc<dyn Delegate>,
    ) -> Self {
        Self::with_registry(
            definitions,
            runs,
            Arc::new(ActionRegistry::builtin(Some(delegate))),
        )
    }

    /// Engine with a caller-provided registry. Used by tests and by
    /// embedders that add custom step types.
    pub fn with_registry(
        definitions: Arc<DefinitionStore>,
        runs: RunStore,
        registry: Arc<ActionRegistry>,
    ) -> Self {
        Self {
            definitions,
            registry,
            runs,
        }
    }

    /// Execute a workflow definition against a document.
    ///
    /// Lookup and parameter validation failures are returned as `Err`
    /// before any step runs. Once execution starts, failures terminate
    /// the run as `Failed` and the finished record is returned as `Ok` —
    /// callers always get the run back, with partial `outputs` intact for
    /// diagnosis.
    pub async fn execute(
        &self,
        definition_name: &str,
        document_id: &str,
        parameters: Map<String, Value>,
    ) -> Result<WorkflowRun> {
        let definition = self
            .definitions
            .get(definition_name)
            .ok_or_else(|| EngineError::DefinitionNotFound {
                name: definition_name.to_string(),
            })?
            .clone();

        let mut parameters = parameters;
        validate_parameters(&definition, &mut parameters)?;

        let mut run = WorkflowRun {
            run_id: Uuid::now_v7().to_string(),
            workflow_name: definition.name.clone(),
            document_id: document_id.to_string(),
            status: RunStatus::Queued,
            current_step: None,
            parameters,
            state: Map::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            outputs: Map::new(),
        };

        info!(
            run_id = %run.run_id,
            workflow = %run.workflow_name,
            document_id,
            steps = definition.steps.len(),
            "starting workflow run"
        );

        // Persist in Running before the first step so observers never see
        // a run that exists only in memory.
        run.status = RunStatus::Running;
        self.persist(&run).await;

        match self.run_steps(&definition, &mut run).await {
            Ok(()) => {
                run.status = RunStatus::Success;
                info!(run_id = %run.run_id, "workflow run completed");
            }
            Err(message) => {
                error!(run_id = %run.run_id, error = %message, "workflow run failed");
                run.status = RunStatus::Failed;
                run.error = Some(message);
            }
        }

        run.completed_at = Some(Utc::now());
        self.persist(&run).await;

        Ok(run)
    }

    /// Fetch a run's last persisted record.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<WorkflowRun>> {
        Ok(self.runs.get(run_id).await?)
    }

    /// List runs, most recently started first, optionally filtered by
    /// workflow name.
    pub async fn list_runs(&self, workflow_name: Option<&str>) -> Result<Vec<WorkflowRun>> {
        Ok(self.runs.list(workflow_name).await?)
    }

    // -- internals ----------------------------------------------------------

    /// Execute each step in order, mutating `run` as results land.
    /// Returns the failure message if a step aborts the run.
    async fn run_steps(
        &self,
        definition: &WorkflowDefinition,
        run: &mut WorkflowRun,
    ) -> std::result::Result<(), String> {
        for step in &definition.steps {
            run.current_step = Some(step.id.clone());
            self.persist(run).await;

            info!(
                run_id = %run.run_id,
                step = %step.id,
                step_type = %step.step_type,
                description = %step.description,
                "executing step"
            );

            let resolved = template::resolve_config(&step.config, &render_context(run));

            let ctx = ActionContext {
                state: run.state.clone(),
                registry: Arc::clone(&self.registry),
            };

            let result = self
                .registry
                .dispatch(&step.step_type, &resolved, &ctx)
                .await
                .map_err(|e| format!("step {} failed: {e}", step.id))?;

            // Record the raw result both as the step's output and in the
            // accumulated state, keyed by the literal string
            // "steps.<id>".
            run.state
                .insert(format!("steps.{}", step.id), result.clone());
            run.outputs.insert(step.id.clone(), result.clone());

            if result.get("status").and_then(Value::as_str) == Some("failed") {
                let reason = result
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error");
                return Err(format!("step {} failed: {reason}", step.id));
            }
        }
        Ok(())
    }

    /// Flush the run record. Persistence failures are logged and retried
    /// once; the in-memory record is never lost — it is still returned to
    /// the caller even if the flush keeps failing.
    async fn persist(&self, run: &WorkflowRun) {
        if let Err(first) = self.runs.save(run).await {
            warn!(run_id = %run.run_id, error = %first, "run flush failed, retrying");
            if let Err(second) = self.runs.save(run).await {
                error!(run_id = %run.run_id, error = %second, "run flush failed after retry");
            }
        }
    }
}

/// The template context for step configs: the run's parameters spread at
/// top level, plus the accumulated state bound under `steps`.
fn render_context(run: &WorkflowRun) -> Map<String, Value> {
    let mut ctx = run.parameters.clone();
    ctx.insert("steps".into(), Value::Object(run.state.clone()));
    ctx
}

/// Validate supplied parameters against the definition's specs.
///
/// Required parameters must be present; "string" and "float" specs are
/// type-checked; an "array" spec wraps a lone value into a one-element
/// list instead of failing.
fn validate_parameters(
    definition: &WorkflowDefinition,
    parameters: &mut Map<String, Value>,
) -> Result<()> {
    for spec in &definition.parameters {
        if spec.required && !parameters.contains_key(&spec.name) {
            return Err(EngineError::MissingParameter {
                parameter: spec.name.clone(),
            });
        }

        let Some(value) = parameters.get(&spec.name) else {
            continue;
        };

        match spec.kind.as_deref() {
            Some("string") if !value.is_string() => {
                return Err(EngineError::ParameterType {
                    parameter: spec.name.clone(),
                    expected: "string",
                });
            }
            Some("float") if !value.is_number() => {
                return Err(EngineError::ParameterType {
                    parameter: spec.name.clone(),
                    expected: "number",
                });
            }
            Some("array") if !value.is_array() => {
                info!(parameter = %spec.name, "coercing scalar parameter to one-element array");
                let wrapped = Value::Array(vec![value.clone()]);
                parameters.insert(spec.name.clone(), wrapped);
            }
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ParameterSpec, Step};
    use docflow_store::Database;
    use serde_json::json;

    async fn run_store() -> RunStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        RunStore::new(db)
    }

    fn echo_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "echo".into(),
            description: "Echo a parameter through a transform".into(),
            parameters: vec![ParameterSpec {
                name: "x".into(),
                kind: Some("string".into()),
                required: true,
            }],
            steps: vec![Step {
                id: "s1".into(),
                step_type: "data_transform".into(),
                description: String::new(),
                config: json!({"transformations": {"y": "{{ x }}"}}),
            }],
        }
    }

    fn store_with(definition: WorkflowDefinition) -> Arc<DefinitionStore> {
        let mut store = DefinitionStore::new();
        store.insert(definition);
        Arc::new(store)
    }

    fn params(entries: Value) -> Map<String, Value> {
        entries.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn echo_workflow_succeeds() {
        let engine = WorkflowEngine::new(store_with(echo_definition()), run_store().await);

        let run = engine
            .execute("echo", "doc1", params(json!({"x": "hi"})))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.outputs["s1"]["transformed"]["y"], "hi");
        assert!(run.completed_at.is_some());
        assert!(run.error.is_none());
    }

    #[tokio::test]
    async fn unknown_definition_is_an_error() {
        let engine = WorkflowEngine::new(Arc::new(DefinitionStore::new()), run_store().await);

        let result = engine.execute("missing", "doc1", Map::new()).await;
        assert!(matches!(
            result,
            Err(EngineError::DefinitionNotFound { name }) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn missing_required_parameter_is_an_error() {
        let engine = WorkflowEngine::new(store_with(echo_definition()), run_store().await);

        let result = engine.execute("echo", "doc1", Map::new()).await;
        assert!(matches!(
            result,
            Err(EngineError::MissingParameter { parameter }) if parameter == "x"
        ));
    }

    #[tokio::test]
    async fn wrong_parameter_type_is_an_error() {
        let engine = WorkflowEngine::new(store_with(echo_definition()), run_store().await);

        let result = engine.execute("echo", "doc1", params(json!({"x": 42}))).await;
        assert!(matches!(result, Err(EngineError::ParameterType { .. })));
    }

    #[tokio::test]
    async fn float_parameter_accepts_integers() {
        let mut definition = echo_definition();
        definition.parameters = vec![ParameterSpec {
            name: "amount".into(),
            kind: Some("float".into()),
            required: true,
        }];
        definition.steps[0].config = json!({"transformations": {"y": "{{ amount }}"}});
        let engine = WorkflowEngine::new(store_with(definition), run_store().await);

        let run = engine
            .execute("echo", "doc1", params(json!({"amount": 5000})))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn array_parameter_coerces_scalars() {
        let mut definition = echo_definition();
        definition.parameters = vec![ParameterSpec {
            name: "parties".into(),
            kind: Some("array".into()),
            required: true,
        }];
        definition.steps[0].config =
            json!({"transformations": {"all": "{{ parties | join(\", \") }}"}});
        let engine = WorkflowEngine::new(store_with(definition), run_store().await);

        let run = engine
            .execute("echo", "doc1", params(json!({"parties": "ACME Corp"})))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.parameters["parties"], json!(["ACME Corp"]));
        assert_eq!(run.outputs["s1"]["transformed"]["all"], "ACME Corp");
    }

    #[tokio::test]
    async fn unknown_step_type_fails_the_run_not_the_call() {
        let definition = WorkflowDefinition {
            name: "bad_step".into(),
            description: String::new(),
            parameters: vec![],
            steps: vec![Step {
                id: "s1".into(),
                step_type: "antigravity".into(),
                description: String::new(),
                config: json!({}),
            }],
        };
        let engine = WorkflowEngine::new(store_with(definition), run_store().await);

        let run = engine.execute("bad_step", "doc1", Map::new()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_deref().unwrap().contains("antigravity"));
    }

    #[tokio::test]
    async fn state_records_results_under_flat_keys() {
        let engine = WorkflowEngine::new(store_with(echo_definition()), run_store().await);

        let run = engine
            .execute("echo", "doc1", params(json!({"x": "hi"})))
            .await
            .unwrap();

        // The literal key is "steps.s1" — not a nested map.
        assert!(run.state.contains_key("steps.s1"));
        assert!(!run.state.contains_key("steps"));
    }

    #[tokio::test]
    async fn run_is_readable_through_accessors() {
        let engine = WorkflowEngine::new(store_with(echo_definition()), run_store().await);

        let run = engine
            .execute("echo", "doc1", params(json!({"x": "hi"})))
            .await
            .unwrap();

        let fetched = engine.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Success);
        assert_eq!(fetched.outputs["s1"]["transformed"]["y"], "hi");

        let listed = engine.list_runs(Some("echo")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].run_id, run.run_id);

        assert!(engine.list_runs(Some("other")).await.unwrap().is_empty());
    }
}
