//! Error types surfaced by the orchestration engine.
//!
//! Every fallible public API in this crate returns [`WorkflowError`]. The
//! variants map onto the failure phases of a workflow: input validation,
//! agent resolution, the coordinator's concurrency guard, downstream agent
//! calls, moderator synthesis, pattern dispatch, and cooperative
//! cancellation.
//!
//! Soft conditions are deliberately *not* errors: a judge that is
//! unavailable or a spawn blocked by policy leaves the swarm decision intact
//! and is reported inside `SwarmResult.consensus_analysis` instead.

use std::error::Error;
use std::fmt;

/// Errors that can occur while executing a collaboration pattern.
///
/// # Examples
///
/// ```
/// use quorum::WorkflowError;
///
/// let err = WorkflowError::AgentNotFound("judge-7".into());
/// assert_eq!(err.to_string(), "Agent not found: judge-7");
/// ```
#[derive(Debug, Clone)]
pub enum WorkflowError {
    /// The pattern descriptor is structurally invalid (e.g. fewer than two
    /// agents, zero rounds).
    InvalidInput(String),

    /// The agent provider could not resolve an agent id.
    AgentNotFound(String),

    /// The coordinator refused a run because the agent already has a turn
    /// in flight.
    AgentBusy(String),

    /// A downstream `Agent::chat` call failed inside a fatal phase. The
    /// message names the phase (e.g. "round 2").
    AgentCallFailed { agent_id: String, message: String },

    /// The moderator failed while producing the final debate synthesis.
    ModeratorFailed(String),

    /// The engine was handed a pattern variant it cannot execute.
    UnsupportedPattern(String),

    /// The caller's context was cancelled; no partial result is emitted.
    Cancelled,
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            WorkflowError::AgentNotFound(id) => write!(f, "Agent not found: {}", id),
            WorkflowError::AgentBusy(id) => write!(f, "Agent busy: {}", id),
            WorkflowError::AgentCallFailed { agent_id, message } => {
                write!(f, "Agent '{}' call failed: {}", agent_id, message)
            }
            WorkflowError::ModeratorFailed(msg) => write!(f, "Moderator failed: {}", msg),
            WorkflowError::UnsupportedPattern(kind) => {
                write!(f, "Unsupported pattern: {}", kind)
            }
            WorkflowError::Cancelled => write!(f, "Workflow cancelled"),
        }
    }
}

impl Error for WorkflowError {}
