//! Agent delegate error types.

use thiserror::Error;

/// Alias for `Result<T, AgentError>`.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors surfaced by the delegate boundary.
///
/// Parse failures on the agent's reply are deliberately *not* errors —
/// the client degrades to a neutral value instead (see
/// [`crate::client::DelegateClient`]).
#[derive(Debug, Error)]
pub enum AgentError {
    /// The configured agent endpoint is not a valid URL.
    #[error("invalid agent endpoint `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// The request could not be sent or the connection failed.
    #[error("agent request failed: {reason}")]
    RequestFailed { reason: String },

    /// The agent did not answer within the deadline.
    #[error("agent call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The agent service answered with a non-success HTTP status.
    #[error("agent service returned {status}: {body}")]
    Service { status: u16, body: String },
}
