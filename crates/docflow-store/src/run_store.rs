//! Durable workflow-run records.
//!
//! One row per `run_id`, rewritten in place on every step transition so
//! observers can poll a run's `current_step` while it executes. Records
//! are never deleted by this crate — retention is an external concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ── types ────────────────────────────────────────────────────────────

/// Execution status of a workflow run.
///
/// `Queued` and `Running` are transient; the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run exists but no step has started.
    Queued,
    /// The run is executing steps.
    Running,
    /// All steps completed.
    Success,
    /// A step failed or raised; remaining steps were skipped.
    Failed,
    /// The run was cancelled by the caller.
    Cancelled,
}

impl RunStatus {
    /// Stable string form used in the database and in serialized records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this status ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

/// One execution attempt of a workflow definition.
///
/// Mutated by the engine once per step and flushed after every mutation.
/// `parameters` is fixed at start; `state` accumulates step results under
/// flat `"steps.<id>"` keys; `outputs` maps step ids to their raw results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Opaque identifier generated when the run starts.
    pub run_id: String,
    /// Name of the definition being executed.
    pub workflow_name: String,
    /// The document this run operates on.
    pub document_id: String,
    /// Current status.
    pub status: RunStatus,
    /// Id of the step being executed, if any.
    pub current_step: Option<String>,
    /// Caller-supplied parameters, immutable after start.
    pub parameters: Map<String, Value>,
    /// Accumulated step results keyed by `"steps.<step_id>"`.
    pub state: Map<String, Value>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Human-readable failure description, if the run failed.
    pub error: Option<String>,
    /// Raw handler results keyed by step id.
    pub outputs: Map<String, Value>,
}

// ── RunStore ─────────────────────────────────────────────────────────

/// Persistence operations on [`WorkflowRun`] records.
#[derive(Clone)]
pub struct RunStore {
    db: Database,
}

impl RunStore {
    /// Create a run store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Flush the full run record, inserting or overwriting in place.
    pub async fn save(&self, run: &WorkflowRun) -> StoreResult<()> {
        let run_id = run.run_id.clone();
        let workflow_name = run.workflow_name.clone();
        let document_id = run.document_id.clone();
        let status = run.status.as_str();
        let current_step = run.current_step.clone();
        let parameters = serde_json::to_string(&run.parameters)?;
        let state = serde_json::to_string(&run.state)?;
        let started_at = run.started_at.to_rfc3339();
        let completed_at = run.completed_at.map(|t| t.to_rfc3339());
        let error = run.error.clone();
        let outputs = serde_json::to_string(&run.outputs)?;

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO runs (run_id, workflow_name, document_id, status, current_step, \
                                       parameters, state, started_at, completed_at, error, outputs) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
                     ON CONFLICT(run_id) DO UPDATE SET \
                         status = excluded.status, \
                         current_step = excluded.current_step, \
                         state = excluded.state, \
                         completed_at = excluded.completed_at, \
                         error = excluded.error, \
                         outputs = excluded.outputs",
                    rusqlite::params![
                        run_id,
                        workflow_name,
                        document_id,
                        status,
                        current_step,
                        parameters,
                        state,
                        started_at,
                        completed_at,
                        error,
                        outputs
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(run_id = %run.run_id, status = run.status.as_str(), "run record flushed");
        Ok(())
    }

    /// Fetch a run by id, returning `None` if unknown.
    pub async fn get(&self, run_id: &str) -> StoreResult<Option<WorkflowRun>> {
        let run_id = run_id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("{SELECT_RUN} WHERE run_id = ?1"),
                    rusqlite::params![run_id],
                    map_run_row,
                );
                match result {
                    Ok(row) => row.into_run().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List runs, most recently started first.
    ///
    /// With `workflow_name`, only runs of that definition are returned.
    pub async fn list(&self, workflow_name: Option<&str>) -> StoreResult<Vec<WorkflowRun>> {
        let filter = workflow_name.map(|s| s.to_string());
        self.db
            .execute(move |conn| {
                let rows = match &filter {
                    Some(name) => {
                        let mut stmt = conn.prepare(&format!(
                            "{SELECT_RUN} WHERE workflow_name = ?1 ORDER BY started_at DESC"
                        ))?;
                        let rows = stmt
                            .query_map(rusqlite::params![name], map_run_row)?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let mut stmt =
                            conn.prepare(&format!("{SELECT_RUN} ORDER BY started_at DESC"))?;
                        let rows = stmt
                            .query_map([], map_run_row)?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                };

                rows.into_iter().map(|r| r.into_run()).collect()
            })
            .await
    }
}

// ── internal row mapping ─────────────────────────────────────────────

const SELECT_RUN: &str = "SELECT run_id, workflow_name, document_id, status, current_step, \
                                 parameters, state, started_at, completed_at, error, outputs \
                          FROM runs";

/// Raw row data before JSON/timestamp parsing.
///
/// Keeps fallible parsing out of the rusqlite row closure; conversion to
/// [`WorkflowRun`] happens in a second step that can return store errors.
struct RunRow {
    run_id: String,
    workflow_name: String,
    document_id: String,
    status: String,
    current_step: Option<String>,
    parameters: String,
    state: String,
    started_at: String,
    completed_at: Option<String>,
    error: Option<String>,
    outputs: String,
}

fn map_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        run_id: row.get(0)?,
        workflow_name: row.get(1)?,
        document_id: row.get(2)?,
        status: row.get(3)?,
        current_step: row.get(4)?,
        parameters: row.get(5)?,
        state: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
        error: row.get(9)?,
        outputs: row.get(10)?,
    })
}

impl RunRow {
    fn into_run(self) -> StoreResult<WorkflowRun> {
        let status = RunStatus::parse(&self.status).ok_or_else(|| StoreError::CorruptRecord {
            run_id: self.run_id.clone(),
            field: "status",
            value: self.status.clone(),
        })?;

        let started_at = parse_timestamp(&self.run_id, "started_at", &self.started_at)?;
        let completed_at = match &self.completed_at {
            Some(t) => Some(parse_timestamp(&self.run_id, "completed_at", t)?),
            None => None,
        };

        Ok(WorkflowRun {
            parameters: serde_json::from_str(&self.parameters)?,
            state: serde_json::from_str(&self.state)?,
            outputs: serde_json::from_str(&self.outputs)?,
            run_id: self.run_id,
            workflow_name: self.workflow_name,
            document_id: self.document_id,
            status,
            current_step: self.current_step,
            started_at,
            completed_at,
            error: self.error,
        })
    }
}

fn parse_timestamp(
    run_id: &str,
    field: &'static str,
    value: &str,
) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::CorruptRecord {
            run_id: run_id.to_string(),
            field,
            value: value.to_string(),
        })
}

// ── tests ────────────────────────────────────────────────────────────
