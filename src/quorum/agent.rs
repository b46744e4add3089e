//! Agent capabilities and the cancellable call context.
//!
//! The orchestration engine never talks to an LLM provider directly. It works
//! against three capability traits:
//!
//! - [`Agent`] — a chat-capable participant. Given a session id and a prompt
//!   it returns a [`ChatResponse`] carrying content, optional thinking, any
//!   tool executions the agent performed, and usage/cost accounting.
//! - [`AgentProvider`] — resolves opaque agent ids to live [`Agent`]s. The
//!   provider owns agent lifecycles; orchestrators hold transient `Arc`
//!   references only.
//! - [`EphemeralAgentFactory`] — an *optional* provider extension for
//!   spawning role-based agents on demand (e.g. a tie-breaking judge).
//!   Feature-detected through [`AgentProvider::ephemeral_factory`], which
//!   defaults to `None` — providers that cannot spawn simply don't override
//!   it.
//!
//! Every orchestrator call threads a [`Context`]: a cheap cloneable handle
//! wrapping a cancellation token. Cancellation is cooperative — orchestrators
//! check the context before each agent call and abort with
//! [`WorkflowError::Cancelled`](crate::WorkflowError::Cancelled) without
//! emitting a partial result.
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum::{Agent, ChatResponse, Context, WorkflowError};
//! use async_trait::async_trait;
//!
//! struct EchoAgent;
//!
//! #[async_trait]
//! impl Agent for EchoAgent {
//!     async fn chat(
//!         &self,
//!         _ctx: &Context,
//!         _session_id: &str,
//!         prompt: &str,
//!     ) -> Result<ChatResponse, WorkflowError> {
//!         Ok(ChatResponse::text(prompt, "echo-1", "local"))
//!     }
//!
//!     fn name(&self) -> &str { "echo" }
//!     fn llm_model(&self) -> &str { "echo-1" }
//!     fn llm_provider_name(&self) -> &str { "local" }
//! }
//! ```

use crate::quorum::error::WorkflowError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cancellable call context threaded through every orchestrator and agent
/// call.
///
/// Cloning is cheap; clones share the same cancellation state. Use
/// [`Context::child`] to derive a scope that can be cancelled independently
/// while still observing the parent's cancellation.
#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
}

impl Context {
    /// Create a fresh, un-cancelled context.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a child context. Cancelling the parent cancels the child;
    /// cancelling the child leaves the parent alone.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
        }
    }

    /// Request cancellation of this context and its children.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve once cancellation is requested. Agent implementations can
    /// `select!` this against their provider I/O to abort promptly.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Return [`WorkflowError::Cancelled`] if cancellation was requested.
    /// Orchestrators call this before every suspension point.
    pub fn check(&self) -> Result<(), WorkflowError> {
        if self.is_cancelled() {
            Err(WorkflowError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// How many tokens were spent on prompt vs. completion, and what it cost.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Dollar cost of the call as reported by the provider, `0.0` when the
    /// provider does not price calls.
    pub cost_usd: f64,
}

/// One tool execution performed by an agent while answering a prompt.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolExecution {
    /// Name of the executed tool (e.g. `"execute_sql"`).
    pub tool_name: String,
    /// Whether the tool run succeeded.
    pub succeeded: bool,
}

/// Structured reply returned by [`Agent::chat`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatResponse {
    /// Final message content.
    pub content: String,
    /// Optional reasoning trace, when the model surfaces one.
    pub thinking: Option<String>,
    /// Tool executions performed during this chat turn, in order.
    pub tool_executions: Vec<ToolExecution>,
    /// Token and cost accounting for the turn.
    pub usage: Usage,
    /// Model identifier that produced the reply (e.g. `"gpt-4.1"`).
    pub model: String,
    /// Provider label (e.g. `"openai"`).
    pub provider: String,
}

impl ChatResponse {
    /// Convenience constructor for plain-text replies with zero usage.
    /// Mostly useful in tests and mock agents.
    pub fn text(
        content: impl Into<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            thinking: None,
            tool_executions: Vec::new(),
            usage: Usage::default(),
            model: model.into(),
            provider: provider.into(),
        }
    }
}

/// A chat-capable participant in a collaboration pattern.
///
/// Session ids are opaque strings; orchestrators derive them as
/// `<workflow>-round<n>-<agent>-<purpose>` so downstream persistence can
/// attribute spans and messages, but the agent only needs them to be unique
/// per logical conversation.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Send a prompt within the given session and return the structured
    /// reply. Implementations should honor `ctx` cancellation.
    async fn chat(
        &self,
        ctx: &Context,
        session_id: &str,
        prompt: &str,
    ) -> Result<ChatResponse, WorkflowError>;

    /// Stable display name of the agent.
    fn name(&self) -> &str;

    /// Identifier of the backing model (e.g. `"claude-sonnet-4"`).
    fn llm_model(&self) -> &str;

    /// Label of the backing provider (e.g. `"anthropic"`).
    fn llm_provider_name(&self) -> &str;
}

/// Factory extension for providers that can construct role-based agents on
/// demand. Spawning is always bounded by an
/// [`EphemeralAgentPolicy`](crate::EphemeralAgentPolicy) — the orchestrators
/// consult the policy evaluator before calling this.
#[async_trait]
pub trait EphemeralAgentFactory: Send + Sync {
    /// Create a transient agent for the given role (e.g. `"judge"`).
    async fn create_ephemeral_agent(
        &self,
        ctx: &Context,
        role: &str,
    ) -> Result<Arc<dyn Agent>, WorkflowError>;
}

/// Resolves agent ids to live agents.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// Resolve `id` to an agent, or fail with
    /// [`WorkflowError::AgentNotFound`].
    async fn get_agent(&self, ctx: &Context, id: &str) -> Result<Arc<dyn Agent>, WorkflowError>;

    /// Capability probe: providers that can spawn ephemeral agents return
    /// their factory here. The default advertises no factory.
    fn ephemeral_factory(&self) -> Option<&dyn EphemeralAgentFactory> {
        None
    }
}
