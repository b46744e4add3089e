//! Pipeline and fork-join orchestrators.
//!
//! Both reuse the same relay mechanics: agents are resolved up front, called
//! sequentially in input order (so outputs are reproducible), and every
//! call's usage is folded into the workflow cost.
//!
//! - **Pipeline**: stage N's output is handed to stage N+1 together with the
//!   original task; the merged output is the final stage's content.
//! - **Fork-join**: every branch processes the same task; the join is
//!   produced by an optional merge agent over all branch outputs, or by a
//!   deterministic concatenation when no merge agent is configured.
//!
//! Any stage, branch, or merge failure is fatal — partial results are not
//! emitted.

use crate::quorum::agent::{Agent, AgentProvider, Context};
use crate::quorum::error::WorkflowError;
use crate::quorum::pattern::{
    AgentResult, CollaborationMetrics, CollaborationResult, CostSummary, ForkJoinPattern,
    ForkJoinResult, PipelinePattern, PipelineResult, StageOutput, WorkflowResult,
};
use crate::quorum::progress::{NoopProgressSink, ProgressEvent, ProgressSink, Stage};
use crate::quorum::trace::Tracer;
use std::collections::HashMap;
use std::sync::Arc;

/// Runs the sequential pipeline and fork-join collaboration shapes.
pub struct RelayOrchestrator {
    provider: Arc<dyn AgentProvider>,
    tracer: Arc<dyn Tracer>,
    sink: Arc<dyn ProgressSink>,
}

impl RelayOrchestrator {
    pub fn new(provider: Arc<dyn AgentProvider>, tracer: Arc<dyn Tracer>) -> Self {
        Self {
            provider,
            tracer,
            sink: Arc::new(NoopProgressSink),
        }
    }

    /// Stream staged progress to `sink` during execution (builder pattern).
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run a pipeline to a terminal [`WorkflowResult`].
    pub async fn execute_pipeline(
        &self,
        ctx: &Context,
        workflow_id: &str,
        pattern: &PipelinePattern,
    ) -> Result<WorkflowResult, WorkflowError> {
        if pattern.agent_ids.is_empty() {
            return Err(WorkflowError::InvalidInput(
                "pipeline requires at least 1 agent".to_string(),
            ));
        }

        let mut agents: Vec<(String, Arc<dyn Agent>)> = Vec::new();
        for id in &pattern.agent_ids {
            agents.push((id.clone(), self.provider.get_agent(ctx, id).await?));
        }

        let span = self.tracer.start_span("pipeline.execute");
        span.set_attribute("stages", &agents.len().to_string());

        let mut cost = CostSummary::default();
        let mut models_used = HashMap::new();
        let mut stages: Vec<StageOutput> = Vec::new();
        let mut carry = pattern.task.clone();

        for (idx, (agent_id, agent)) in agents.iter().enumerate() {
            ctx.check()?;
            self.sink
                .emit(
                    ProgressEvent::stage(
                        Stage::LLMGeneration,
                        format!("Stage {}: {}", idx + 1, agent_id),
                    )
                    .with_progress_pct((idx * 100 / agents.len()) as u8)
                    .with_cost(cost.total_usd),
                )
                .await;

            let prompt = if idx == 0 {
                carry.clone()
            } else {
                format!(
                    "Original task: {}\n\nOutput from the previous stage:\n{}\n\n\
                     Continue the work, building on the output above.",
                    pattern.task, carry
                )
            };
            let session_id = format!("{}-round{}-{}-pipeline", workflow_id, idx + 1, agent_id);
            let response = agent.chat(ctx, &session_id, &prompt).await.map_err(|e| {
                span.record_error(&e);
                WorkflowError::AgentCallFailed {
                    agent_id: agent_id.clone(),
                    message: format!("stage {} failed: {}", idx + 1, e),
                }
            })?;

            cost.record(agent_id, &response.usage);
            models_used.insert(agent_id.clone(), response.model.clone());
            carry = response.content.clone();
            stages.push(StageOutput {
                agent_id: agent_id.clone(),
                content: response.content,
            });
        }
        span.end();

        let metrics = relay_metrics(&stages);
        let per_agent_results = stages
            .iter()
            .map(|s| AgentResult {
                agent_id: s.agent_id.clone(),
                output: s.content.clone(),
                model: models_used.get(&s.agent_id).cloned().unwrap_or_default(),
                provider: String::new(),
            })
            .collect();

        let mut metadata = HashMap::new();
        metadata.insert("workflow_id".to_string(), workflow_id.to_string());

        Ok(WorkflowResult {
            pattern_type: "pipeline".to_string(),
            per_agent_results,
            merged_output: carry,
            cost,
            models_used,
            metrics,
            duration_ms: 0,
            metadata,
            collaboration: CollaborationResult::Pipeline(PipelineResult { stages }),
        })
    }

    /// Run a fork-join to a terminal [`WorkflowResult`].
    pub async fn execute_fork_join(
        &self,
        ctx: &Context,
        workflow_id: &str,
        pattern: &ForkJoinPattern,
    ) -> Result<WorkflowResult, WorkflowError> {
        if pattern.agent_ids.len() < 2 {
            return Err(WorkflowError::InvalidInput(
                "fork-join requires at least 2 agents".to_string(),
            ));
        }

        let mut agents: Vec<(String, Arc<dyn Agent>)> = Vec::new();
        for id in &pattern.agent_ids {
            agents.push((id.clone(), self.provider.get_agent(ctx, id).await?));
        }

        let span = self.tracer.start_span("fork_join.execute");
        span.set_attribute("branches", &agents.len().to_string());

        let mut cost = CostSummary::default();
        let mut models_used = HashMap::new();
        let mut branches: Vec<StageOutput> = Vec::new();

        for (idx, (agent_id, agent)) in agents.iter().enumerate() {
            ctx.check()?;
            self.sink
                .emit(
                    ProgressEvent::stage(
                        Stage::LLMGeneration,
                        format!("Branch: {}", agent_id),
                    )
                    .with_progress_pct((idx * 100 / agents.len()) as u8)
                    .with_cost(cost.total_usd),
                )
                .await;

            let session_id = format!("{}-round1-{}-forkjoin", workflow_id, agent_id);
            let response = agent
                .chat(ctx, &session_id, &pattern.task)
                .await
                .map_err(|e| {
                    span.record_error(&e);
                    WorkflowError::AgentCallFailed {
                        agent_id: agent_id.clone(),
                        message: format!("branch failed: {}", e),
                    }
                })?;

            cost.record(agent_id, &response.usage);
            models_used.insert(agent_id.clone(), response.model.clone());
            branches.push(StageOutput {
                agent_id: agent_id.clone(),
                content: response.content,
            });
        }

        // Join: a merge agent when configured, else deterministic
        // concatenation in input order.
        let merged_output = match &pattern.merge_agent_id {
            Some(merge_id) => {
                ctx.check()?;
                let merge_agent = self.provider.get_agent(ctx, merge_id).await?;
                let mut prompt = format!(
                    "Original task: {}\n\nBranch outputs:\n",
                    pattern.task
                );
                for branch in &branches {
                    prompt.push_str(&format!("[{}]\n{}\n\n", branch.agent_id, branch.content));
                }
                prompt.push_str("Merge the branch outputs above into a single coherent result.");
                let session_id = format!("{}-round2-{}-merge", workflow_id, merge_id);
                let response = merge_agent
                    .chat(ctx, &session_id, &prompt)
                    .await
                    .map_err(|e| {
                        span.record_error(&e);
                        WorkflowError::AgentCallFailed {
                            agent_id: merge_id.clone(),
                            message: format!("merge failed: {}", e),
                        }
                    })?;
                cost.record(merge_id, &response.usage);
                models_used.insert(merge_id.clone(), response.model.clone());
                response.content
            }
            None => branches
                .iter()
                .map(|b| format!("[{}] {}", b.agent_id, b.content))
                .collect::<Vec<_>>()
                .join("\n\n"),
        };
        span.end();

        let metrics = relay_metrics(&branches);
        let per_agent_results = branches
            .iter()
            .map(|b| AgentResult {
                agent_id: b.agent_id.clone(),
                output: b.content.clone(),
                model: models_used.get(&b.agent_id).cloned().unwrap_or_default(),
                provider: String::new(),
            })
            .collect();

        let mut metadata = HashMap::new();
        metadata.insert("workflow_id".to_string(), workflow_id.to_string());

        Ok(WorkflowResult {
            pattern_type: "fork_join".to_string(),
            per_agent_results,
            merged_output,
            cost,
            models_used,
            metrics,
            duration_ms: 0,
            metadata,
            collaboration: CollaborationResult::ForkJoin(ForkJoinResult {
                branches,
                merge_agent_id: pattern.merge_agent_id.clone(),
            }),
        })
    }
}

fn relay_metrics(outputs: &[StageOutput]) -> CollaborationMetrics {
    if outputs.is_empty() {
        return CollaborationMetrics::default();
    }
    let avg_response_length = outputs
        .iter()
        .map(|o| o.content.chars().count())
        .sum::<usize>() as f64
        / outputs.len() as f64;
    CollaborationMetrics {
        avg_response_length,
        interaction_count: outputs.len(),
        ..Default::default()
    }
}
