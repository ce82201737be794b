//! Workflow definitions and the definition store.
//!
//! A definition is data, not code: a name, the parameters a run must
//! supply, and an ordered list of typed steps. Definitions are loaded
//! from YAML files once at startup and are read-only afterwards, shared
//! freely across concurrent runs.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Declares one parameter a run must (or may) supply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter key in the run's parameter map.
    pub name: String,
    /// Expected runtime type: "string", "float", or "array". Absent means
    /// unchecked.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Whether execution refuses to start without this parameter.
    #[serde(default)]
    pub required: bool,
}

/// One unit of work within a definition.
///
/// The `step_type` string is the only polymorphism axis — it selects the
/// handler in the action registry. `config` is an arbitrary nested map
/// whose string leaves may contain `{{ ... }}` template expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique id within the definition.
    pub id: String,
    /// Registry key selecting the handler.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Handler configuration, resolved against the run context before
    /// dispatch.
    #[serde(default = "empty_config")]
    pub config: Value,
}

fn empty_config() -> Value {
    Value::Object(Map::new())
}

/// A complete workflow definition, immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique key in the definition store.
    pub name: String,
    /// What this workflow does — also fed to the semantic matcher.
    #[serde(default)]
    pub description: String,
    /// Parameter specs validated before execution.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Steps, executed in declaration order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl WorkflowDefinition {
    /// Check structural invariants: non-empty name, unique step ids.
    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("definition has no name".into());
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(format!("duplicate step id `{}`", step.id));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Definition store
// ---------------------------------------------------------------------------

/// In-memory index of workflow definitions by name.
///
/// Loaded once, then shared behind an `Arc`. A single malformed file
/// never fails the whole load; it is logged and skipped. Duplicate names
/// are skipped too — the first definition wins.
#[derive(Debug, Default)]
pub struct DefinitionStore {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl DefinitionStore {
    /// Create an empty store (definitions added via [`insert`](Self::insert)).
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.yaml` / `*.yml` file under `dir`.
    ///
    /// Fails only if the directory itself cannot be read.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| EngineError::DefinitionDir {
            path: dir.to_path_buf(),
            source,
        })?;

        // Sort by file name so duplicate handling is deterministic.
        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        let mut store = Self::new();
        for path in paths {
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read definition file, skipping");
                    continue;
                }
            };

            let definition: WorkflowDefinition = match serde_yaml::from_str(&text) {
                Ok(def) => def,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed definition file, skipping");
                    continue;
                }
            };

            if store.insert(definition) {
                info!(path = %path.display(), "loaded workflow definition");
            }
        }

        info!(count = store.len(), "definition store ready");
        Ok(store)
    }

    /// Register a definition. Returns `false` (with a warning) if the
    /// definition is invalid or its name is already taken.
    pub fn insert(&mut self, definition: WorkflowDefinition) -> bool {
        if let Err(reason) = definition.validate() {
            warn!(workflow = %definition.name, reason, "invalid definition, skipping");
            return false;
        }
        if self.definitions.contains_key(&definition.name) {
            warn!(workflow = %definition.name, "duplicate definition name, keeping the first");
            return false;
        }
        self.definitions.insert(definition.name.clone(), definition);
        true
    }

    /// Fetch a definition by name.
    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(name)
    }

    /// Whether a definition with this exact name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// All registered names, sorted for deterministic iteration.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Name → description catalog, sorted by name. Fed to the semantic
    /// matching stage.
    pub fn descriptions(&self) -> Vec<(&str, &str)> {
        let mut catalog: Vec<(&str, &str)> = self
            .definitions
            .values()
            .map(|d| (d.name.as_str(), d.description.as_str()))
            .collect();
        catalog.sort_unstable_by_key(|(name, _)| *name);
        catalog
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the store holds no definitions.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const REVIEW_YAML: &str = r#"
name: document_review
description: Review a document for issues
parameters:
  - name: document_type
    type: string
    required: true
steps:
  - id: fetch
    type: api_call
    description: Fetch the document
    config:
      url: "https://example.com/documents/{{ document_id }}"
  - id: summarize
    type: analyze
    config:
      prompt: Summarize the document
"#;

    #[test]
    fn parse_definition_from_yaml() {
        let def: WorkflowDefinition = serde_yaml::from_str(REVIEW_YAML).unwrap();
        assert_eq!(def.name, "document_review");
        assert_eq!(def.parameters.len(), 1);
        assert!(def.parameters[0].required);
        assert_eq!(def.parameters[0].kind.as_deref(), Some("string"));
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].step_type, "api_call");
        assert_eq!(def.steps[1].config["prompt"], "Summarize the document");
    }

    #[test]
    fn step_without_config_gets_empty_map() {
        let yaml = "name: minimal\nsteps:\n  - id: s1\n    type: send_email\n";
        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        assert!(def.steps[0].config.as_object().unwrap().is_empty());
    }

    #[test]
    fn load_dir_skips_malformed_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a_review.yaml"), REVIEW_YAML).unwrap();
        fs::write(dir.path().join("b_broken.yaml"), "steps: [not: {valid").unwrap();
        // Same name as a_review.yaml — must be skipped, first wins.
        fs::write(
            dir.path().join("c_duplicate.yaml"),
            "name: document_review\ndescription: duplicate\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "not yaml").unwrap();

        let store = DefinitionStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        let def = store.get("document_review").unwrap();
        assert_eq!(def.description, "Review a document for issues");
    }

    #[test]
    fn load_dir_fails_on_missing_directory() {
        let result = DefinitionStore::load_dir("/nonexistent/workflows");
        assert!(matches!(
            result,
            Err(EngineError::DefinitionDir { .. })
        ));
    }

    #[test]
    fn insert_rejects_duplicate_step_ids() {
        let yaml = "name: dupsteps\nsteps:\n  - id: s1\n    type: send_email\n  - id: s1\n    type: send_email\n";
        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();

        let mut store = DefinitionStore::new();
        assert!(!store.insert(def));
        assert!(store.is_empty());
    }

    #[test]
    fn insert_rejects_empty_name() {
        let mut store = DefinitionStore::new();
        let def = WorkflowDefinition {
            name: "  ".into(),
            description: String::new(),
            parameters: vec![],
            steps: vec![],
        };
        assert!(!store.insert(def));
    }

    #[test]
    fn names_and_descriptions_are_sorted() {
        let mut store = DefinitionStore::new();
        for name in ["zeta", "alpha", "mid"] {
            store.insert(WorkflowDefinition {
                name: name.into(),
                description: format!("{name} workflow"),
                parameters: vec![],
                steps: vec![],
            });
        }
        assert_eq!(store.names(), vec!["alpha", "mid", "zeta"]);
        assert_eq!(store.descriptions()[0], ("alpha", "alpha workflow"));
    }
}
