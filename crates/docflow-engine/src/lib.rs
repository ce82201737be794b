//! # docflow-engine
//!
//! The workflow execution core:
//!
//! - **Definition store**: YAML workflow definitions (name, parameter
//!   specs, ordered steps) loaded once at startup via
//!   [`definition::DefinitionStore`].
//! - **Template resolver**: pure substitution of `{{ ... }}` expressions
//!   in nested step configuration via [`template`].
//! - **Action registry**: step-type strings mapped to side-effecting
//!   handlers with a uniform contract via [`actions::ActionRegistry`].
//! - **Workflow engine**: step sequencing, parameter validation, run
//!   state persistence, and status transitions via
//!   [`engine::WorkflowEngine`].
//! - **Name resolver**: the five-stage matching cascade that maps a
//!   requested (possibly misspelled or invented) workflow name onto a
//!   registered definition via [`matcher::WorkflowMatcher`].

pub mod actions;
pub mod definition;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod template;

// ── re-exports ───────────────────────────────────────────────────────

pub use actions::{ActionContext, ActionHandler, ActionRegistry};
pub use definition::{DefinitionStore, ParameterSpec, Step, WorkflowDefinition};
pub use engine::WorkflowEngine;
pub use error::{EngineError, Result};
pub use matcher::{MatchReason, MatchResult, WorkflowMatcher};
pub use docflow_store::{RunStatus, WorkflowRun};
