// src/lib.rs

// Import the top-level `quorum` module.
pub mod quorum;

// Re-exporting key items for easier external access.
pub use quorum::agent::{Agent, AgentProvider, ChatResponse, Context, EphemeralAgentFactory, Usage};
pub use quorum::engine::Engine;
pub use quorum::error::WorkflowError;
pub use quorum::pattern::{Pattern, WorkflowResult};
pub use quorum::policy::{EphemeralAgentPolicy, PolicyEvaluator, SpawnTrigger};
