//! # docflow-agent
//!
//! The external-agent delegate boundary.
//!
//! The workflow engine never interprets natural language itself — delegate
//! and analyze steps, and the name resolver's semantic stage, all hand a
//! prompt to an external agent process and wait for its reply. That
//! process can take seconds to minutes and occasionally answers with prose
//! where JSON was requested, so this crate owns the defensive plumbing:
//! per-call timeouts, markdown-fence-tolerant parsing, optional JSON
//! Schema validation, and a neutral fallback value when the reply cannot
//! be interpreted.

pub mod client;
pub mod error;
pub mod testing;
pub mod types;

// ── re-exports ───────────────────────────────────────────────────────

pub use client::{Delegate, DelegateClient, DelegateConfig};
pub use error::{AgentError, AgentResult};
pub use types::{AnalyzeRequest, TaskRequest};
