//! The engine: pattern dispatch, tracing, and duration accounting.
//!
//! The [`Engine`] is the single entry point for executing a collaboration
//! [`Pattern`]. It generates a workflow id, opens the root
//! `workflow.execute` span, routes the pattern to the matching
//! orchestrator, stamps the wall-clock duration onto the result, and emits
//! the terminal progress event (`Completed` or `Failed`).
//!
//! Orchestrator errors propagate unchanged; the engine records them on the
//! root span. Pattern variants with contract-only placeholders
//! (pair-programming, teacher-student) fail with
//! [`WorkflowError::UnsupportedPattern`].
//!
//! # Example
//!
//! ```rust,no_run
//! use quorum::quorum::pattern::{DebatePattern, Pattern};
//! use quorum::quorum::trace::NoopTracer;
//! use quorum::{Context, Engine};
//! use std::sync::Arc;
//!
//! # async fn run(provider: Arc<dyn quorum::AgentProvider>) {
//! let engine = Engine::new(provider, Arc::new(NoopTracer));
//! let pattern = Pattern::Debate(DebatePattern {
//!     topic: "Pick a storage engine".to_string(),
//!     agent_ids: vec!["analyst".to_string(), "skeptic".to_string()],
//!     rounds: 3,
//!     moderator_agent_id: None,
//! });
//! let result = engine.execute(&Context::new(), &pattern).await.unwrap();
//! println!("decision: {}", result.merged_output);
//! # }
//! ```

use crate::quorum::agent::{AgentProvider, Context};
use crate::quorum::debate::DebateOrchestrator;
use crate::quorum::error::WorkflowError;
use crate::quorum::pattern::{Pattern, WorkflowResult};
use crate::quorum::policy::{EphemeralAgentPolicy, PolicyEvaluator};
use crate::quorum::progress::{NoopProgressSink, ProgressEvent, ProgressSink, Stage};
use crate::quorum::relay::RelayOrchestrator;
use crate::quorum::swarm::SwarmOrchestrator;
use crate::quorum::trace::Tracer;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runtime knobs for the engine. Constructed in code; there is no file
/// parsing.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a turn may sit waiting for a human-in-the-loop reply before
    /// the coordinator gives up on it. Forwarded to the coordinator adapter.
    pub hitl_timeout: Duration,
    /// Override for the default judge policy used by swarm escalation.
    pub judge_policy: Option<EphemeralAgentPolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hitl_timeout: Duration::from_secs(300),
            judge_policy: None,
        }
    }
}

/// Dispatches patterns to their orchestrators.
pub struct Engine {
    provider: Arc<dyn AgentProvider>,
    tracer: Arc<dyn Tracer>,
    policy: Arc<PolicyEvaluator>,
    sink: Arc<dyn ProgressSink>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(provider: Arc<dyn AgentProvider>, tracer: Arc<dyn Tracer>) -> Self {
        Self {
            provider,
            tracer,
            policy: Arc::new(PolicyEvaluator::new()),
            sink: Arc::new(NoopProgressSink),
            config: EngineConfig::default(),
        }
    }

    /// Stream staged progress to `sink` during execution (builder pattern).
    /// The sink is propagated to every orchestrator.
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Override the default configuration (builder pattern).
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The shared spawn accounting used by swarm judge escalation. Exposed
    /// so callers can inspect spawn stats after an execution.
    pub fn policy_evaluator(&self) -> Arc<PolicyEvaluator> {
        Arc::clone(&self.policy)
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute one pattern to a terminal [`WorkflowResult`].
    pub async fn execute(
        &self,
        ctx: &Context,
        pattern: &Pattern,
    ) -> Result<WorkflowResult, WorkflowError> {
        let workflow_id = uuid::Uuid::new_v4().to_string();
        let span = self.tracer.start_span("workflow.execute");
        span.set_attribute("pattern.type", pattern.pattern_type());
        span.set_attribute("workflow.id", &workflow_id);

        self.sink
            .emit(ProgressEvent::stage(
                Stage::PatternSelection,
                format!("Executing {} pattern", pattern.pattern_type()),
            ))
            .await;

        let started = Instant::now();
        let result = match pattern {
            Pattern::Debate(debate) => {
                DebateOrchestrator::new(Arc::clone(&self.provider), Arc::clone(&self.tracer))
                    .with_progress_sink(Arc::clone(&self.sink))
                    .execute(ctx, &workflow_id, debate)
                    .await
            }
            Pattern::Swarm(swarm) => {
                let mut orchestrator = SwarmOrchestrator::new(
                    Arc::clone(&self.provider),
                    Arc::clone(&self.tracer),
                    Arc::clone(&self.policy),
                )
                .with_progress_sink(Arc::clone(&self.sink));
                if let Some(judge_policy) = &self.config.judge_policy {
                    orchestrator = orchestrator.with_judge_policy(judge_policy.clone());
                }
                orchestrator.execute(ctx, &workflow_id, swarm).await
            }
            Pattern::Pipeline(pipeline) => {
                RelayOrchestrator::new(Arc::clone(&self.provider), Arc::clone(&self.tracer))
                    .with_progress_sink(Arc::clone(&self.sink))
                    .execute_pipeline(ctx, &workflow_id, pipeline)
                    .await
            }
            Pattern::ForkJoin(fork_join) => {
                RelayOrchestrator::new(Arc::clone(&self.provider), Arc::clone(&self.tracer))
                    .with_progress_sink(Arc::clone(&self.sink))
                    .execute_fork_join(ctx, &workflow_id, fork_join)
                    .await
            }
            Pattern::PairProgramming(_) | Pattern::TeacherStudent(_) => Err(
                WorkflowError::UnsupportedPattern(pattern.pattern_type().to_string()),
            ),
        };

        match result {
            Ok(mut workflow_result) => {
                workflow_result.duration_ms = started.elapsed().as_millis() as u64;
                span.set_attribute("duration_ms", &workflow_result.duration_ms.to_string());
                span.end();
                self.sink
                    .emit(
                        ProgressEvent::stage(Stage::Completed, "")
                            .with_cost(workflow_result.cost.total_usd),
                    )
                    .await;
                Ok(workflow_result)
            }
            Err(e) => {
                span.record_error(&e);
                span.end();
                self.sink
                    .emit(ProgressEvent::stage(Stage::Failed, e.to_string()))
                    .await;
                Err(e)
            }
        }
    }
}
