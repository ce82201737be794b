//! End-to-end properties of the engine and matcher, exercised through the
//! public API the way an embedding service would use them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use docflow_engine::actions::{ActionContext, ActionHandler, ActionRegistry};
use docflow_engine::{
    DefinitionStore, EngineError, MatchReason, ParameterSpec, RunStatus, Step, WorkflowDefinition,
    WorkflowEngine, WorkflowMatcher,
};
use docflow_store::{Database, RunStore};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Records every invocation (step order) and can be told to fail for a
/// given tag.
struct RecordingHandler {
    invocations: Arc<std::sync::Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
    fail_on: Option<String>,
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    async fn handle(&self, config: &Value, _ctx: &ActionContext) -> docflow_engine::Result<Value> {
        let tag = config
            .get("tag")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.calls.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(tag.clone());

        if self.fail_on.as_deref() == Some(tag.as_str()) {
            return Ok(json!({"status": "failed", "error": format!("{tag} was told to fail")}));
        }
        Ok(json!({"status": "success", "tag": tag}))
    }
}

struct Harness {
    engine: WorkflowEngine,
    runs: RunStore,
    invocations: Arc<std::sync::Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

async fn harness(definition: WorkflowDefinition, fail_on: Option<&str>) -> Harness {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let runs = RunStore::new(db);

    let invocations = Arc::new(std::sync::Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = ActionRegistry::builtin(None);
    registry.register(
        "record",
        Arc::new(RecordingHandler {
            invocations: Arc::clone(&invocations),
            calls: Arc::clone(&calls),
            fail_on: fail_on.map(str::to_string),
        }),
    );

    let mut definitions = DefinitionStore::new();
    definitions.insert(definition);

    let engine = WorkflowEngine::with_registry(
        Arc::new(definitions),
        runs.clone(),
        Arc::new(registry),
    );

    Harness {
        engine,
        runs,
        invocations,
        calls,
    }
}

fn record_step(id: &str) -> Step {
    Step {
        id: id.into(),
        step_type: "record".into(),
        description: String::new(),
        config: json!({"tag": id}),
    }
}

fn abc_definition(step_ids: &[&str]) -> WorkflowDefinition {
    WorkflowDefinition {
        name: "ordered".into(),
        description: "Ordered recording steps".into(),
        parameters: vec![],
        steps: step_ids.iter().map(|id| record_step(id)).collect(),
    }
}

fn params(entries: Value) -> Map<String, Value> {
    entries.as_object().cloned().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Parameter gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_required_parameter_invokes_zero_handlers() {
    let mut definition = abc_definition(&["a", "b"]);
    definition.parameters = vec![ParameterSpec {
        name: "document_type".into(),
        kind: Some("string".into()),
        required: true,
    }];

    let h = harness(definition, None).await;
    let result = h.engine.execute("ordered", "doc1", Map::new()).await;

    assert!(matches!(result, Err(EngineError::MissingParameter { .. })));
    // The gate must hold before any step runs — not merely produce a
    // failed final status.
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);

    // Nothing was persisted either: the run never started.
    assert!(h.runs.list(None).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Step ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn steps_execute_in_declaration_order() {
    let h = harness(abc_definition(&["a", "b", "c"]), None).await;
    let run = h.engine.execute("ordered", "doc1", Map::new()).await.unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(*h.invocations.lock().unwrap(), vec!["a", "b", "c"]);

    // Reordering the declared steps reorders execution identically.
    let h2 = harness(abc_definition(&["c", "a", "b"]), None).await;
    h2.engine.execute("ordered", "doc1", Map::new()).await.unwrap();
    assert_eq!(*h2.invocations.lock().unwrap(), vec!["c", "a", "b"]);
}

#[tokio::test]
async fn prior_step_output_is_recorded_before_the_next_runs() {
    /// Asserts that step A's output is already visible when it executes.
    struct InspectingHandler;

    #[async_trait]
    impl ActionHandler for InspectingHandler {
        async fn handle(
            &self,
            _config: &Value,
            ctx: &ActionContext,
        ) -> docflow_engine::Result<Value> {
            let upstream = ctx.state.get("steps.a").cloned().unwrap_or(Value::Null);
            Ok(json!({"status": "success", "saw_upstream": upstream != Value::Null}))
        }
    }

    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let runs = RunStore::new(db);

    let mut registry = ActionRegistry::builtin(None);
    registry.register("inspect", Arc::new(InspectingHandler));
    registry.register(
        "record",
        Arc::new(RecordingHandler {
            invocations: Arc::new(std::sync::Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_on: None,
        }),
    );

    let mut definition = abc_definition(&["a"]);
    definition.steps.push(Step {
        id: "b".into(),
        step_type: "inspect".into(),
        description: String::new(),
        config: json!({}),
    });

    let mut definitions = DefinitionStore::new();
    definitions.insert(definition);
    let engine =
        WorkflowEngine::with_registry(Arc::new(definitions), runs, Arc::new(registry));

    let run = engine.execute("ordered", "doc1", Map::new()).await.unwrap();
    assert_eq!(run.outputs["b"]["saw_upstream"], true);
}

// ---------------------------------------------------------------------------
// Failure short-circuit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_step_short_circuits_and_pins_current_step() {
    let h = harness(abc_definition(&["a", "b", "c"]), Some("b")).await;
    let run = h.engine.execute("ordered", "doc1", Map::new()).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("b"));

    // c's handler never ran.
    assert_eq!(*h.invocations.lock().unwrap(), vec!["a", "b"]);

    // Partial outputs from completed steps stay visible for diagnosis.
    assert_eq!(run.outputs["a"]["status"], "success");
    assert_eq!(run.outputs["b"]["status"], "failed");
    assert!(!run.outputs.contains_key("c"));

    // The persisted record pins current_step at the failing step.
    let persisted = h.runs.get(&run.run_id).await.unwrap().unwrap();
    assert_eq!(persisted.status, RunStatus::Failed);
    assert_eq!(persisted.current_step.as_deref(), Some("b"));
}

// ---------------------------------------------------------------------------
// Echo scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn echo_transform_renders_parameter() {
    let definition = WorkflowDefinition {
        name: "echo".into(),
        description: String::new(),
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
    };

    let h = harness(definition, None).await;
    let run = h
        .engine
        .execute("echo", "doc1", params(json!({"x": "hi"})))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.outputs["s1"]["transformed"]["y"], "hi");
}

// ---------------------------------------------------------------------------
// Flat state key vs. nested template path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn flat_state_key_does_not_resolve_nested_path() {
    // Step two references step one's result through the nested path
    // `steps.first.tag`. State records results under the literal key
    // "steps.first", so the nested lookup finds nothing and the template
    // renders empty. outputs still carries the real result.
    let definition = WorkflowDefinition {
        name: "cross_ref".into(),
        description: String::new(),
        parameters: vec![],
        steps: vec![
            record_step("first"),
            Step {
                id: "second".into(),
                step_type: "record".into(),
                description: String::new(),
                config: json!({"tag": "{{ steps.first.tag }}"}),
            },
        ],
    };

    let h = harness(definition, None).await;
    let run = h.engine.execute("cross_ref", "doc1", Map::new()).await.unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert!(run.state.contains_key("steps.first"));
    assert_eq!(run.outputs["first"]["tag"], "first");
    // The cross-step reference rendered as the empty string.
    assert_eq!(run.outputs["second"]["tag"], "");
}

// ---------------------------------------------------------------------------
// Matcher properties against a realistic registry
// ---------------------------------------------------------------------------

fn matcher_store() -> Arc<DefinitionStore> {
    let mut store = DefinitionStore::new();
    for (name, description) in [
        ("document_review", "Review documents"),
        ("document_signature", "Handle signature requirements"),
        ("complete_missing_info", "Fill in missing information"),
    ] {
        store.insert(WorkflowDefinition {
            name: name.into(),
            description: description.into(),
            parameters: vec![],
            steps: vec![],
        });
    }
    Arc::new(store)
}

#[tokio::test]
async fn nda_review_resolves_with_acceptable_confidence() {
    let matcher = WorkflowMatcher::new(matcher_store());
    let result = matcher.resolve("nda_review", &json!({})).await;

    assert_eq!(result.matched_name, "document_review");
    assert_eq!(result.reason, MatchReason::StaticAlias);
    assert!(result.confidence >= 0.5);
}

#[tokio::test]
async fn repeated_resolution_returns_identical_results() {
    let matcher = WorkflowMatcher::new(matcher_store());
    let context = json!({"action_type": "signature"});

    let first = matcher.resolve("sign_document", &context).await;
    let second = matcher.resolve("sign_document", &context).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn unmatched_name_lands_on_fixed_fallback_every_time() {
    let matcher = WorkflowMatcher::new(matcher_store());

    for _ in 0..3 {
        let result = matcher.resolve("totally_unrelated_zzz", &Value::Null).await;
        assert_eq!(result.reason, MatchReason::GenericFallback);
        assert_eq!(result.confidence, 0.4);
        assert_eq!(result.matched_name, "document_review");
    }
}

// ---------------------------------------------------------------------------
// Resolve-then-execute, the way callers wire the two together
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resolved_name_feeds_execution() {
    let mut definitions = DefinitionStore::new();
    definitions.insert(WorkflowDefinition {
        name: "document_review".into(),
        description: "Review documents".into(),
        parameters: vec![],
        steps: vec![Step {
            id: "notify".into(),
            step_type: "send_email".into(),
            description: String::new(),
            config: json!({"to": "legal@example.com", "subject": "Review requested"}),
        }],
    });
    let definitions = Arc::new(definitions);

    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let engine = WorkflowEngine::new(Arc::clone(&definitions), RunStore::new(db));
    let matcher = WorkflowMatcher::new(definitions);

    let resolved = matcher.resolve("contract_review", &json!({})).await;
    assert!(resolved.confidence >= 0.7, "caller policy would proceed");

    let run = engine
        .execute(&resolved.matched_name, "doc42", Map::new())
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.workflow_name, "document_review");
    assert_eq!(run.outputs["notify"]["sent_to"], "legal@example.com");
}
