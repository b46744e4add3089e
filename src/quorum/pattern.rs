//! Collaboration pattern descriptors and workflow results.
//!
//! A [`Pattern`] is the immutable input to the engine: a tagged variant
//! describing *which* collaboration shape to run and with which agents.
//! Execution constructs rounds, positions, votes and results monotonically
//! during a single `execute` call — nothing is mutated after emission.
//!
//! The terminal output of every pattern is a [`WorkflowResult`]: per-agent
//! contributions, a merged output, cost accounting, collaboration metrics,
//! and the pattern-specific [`CollaborationResult`].
//!
//! | Pattern | Shape | Terminal decision |
//! |---------|-------|-------------------|
//! | `Debate` | N rounds of positions + reactions | consensus or moderator synthesis |
//! | `Swarm` | one (or two-pass) vote per agent | strategy winner, judge on escalation |
//! | `Pipeline` | stage N output feeds stage N+1 | final stage output |
//! | `ForkJoin` | same task to every branch | merge agent or concatenation |
//! | `PairProgramming` | contract only | — |
//! | `TeacherStudent` | contract only | — |

use crate::quorum::agent::Usage;
use crate::quorum::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A declarative collaboration shape. Exactly one variant is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Pattern {
    /// N rounds of positions and reactions driven to consensus.
    Debate(DebatePattern),
    /// Independent or shared voting aggregated by a strategy.
    Swarm(SwarmPattern),
    /// Sequential stages, each feeding the next.
    Pipeline(PipelinePattern),
    /// Fan the task out to every branch, then join.
    ForkJoin(ForkJoinPattern),
    /// Driver/navigator pairing. Contract only — the engine does not execute
    /// this variant yet.
    PairProgramming(PairProgrammingPattern),
    /// Teacher critiques a student's attempts. Contract only — the engine
    /// does not execute this variant yet.
    TeacherStudent(TeacherStudentPattern),
}

impl Pattern {
    /// Stable lowercase label used for tracing attributes and
    /// `WorkflowResult.pattern_type`.
    pub fn pattern_type(&self) -> &'static str {
        match self {
            Pattern::Debate(_) => "debate",
            Pattern::Swarm(_) => "swarm",
            Pattern::Pipeline(_) => "pipeline",
            Pattern::ForkJoin(_) => "fork_join",
            Pattern::PairProgramming(_) => "pair_programming",
            Pattern::TeacherStudent(_) => "teacher_student",
        }
    }
}

/// Descriptor for a debate: a topic argued over a bounded number of rounds.
///
/// Invariant: `agent_ids.len() >= 2 && rounds >= 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebatePattern {
    /// The question under debate.
    pub topic: String,
    /// Debaters in speaking order. At least two.
    pub agent_ids: Vec<String>,
    /// Upper bound on rounds; the debate stops early on consensus.
    pub rounds: usize,
    /// Optional moderator asked for a final synthesis over the full round
    /// history. When unset, no final synthesis call is made.
    pub moderator_agent_id: Option<String>,
}

impl DebatePattern {
    pub(crate) fn validate(&self) -> Result<(), WorkflowError> {
        if self.agent_ids.len() < 2 {
            return Err(WorkflowError::InvalidInput(
                "debate requires at least 2 agents".to_string(),
            ));
        }
        if self.rounds < 1 {
            return Err(WorkflowError::InvalidInput(
                "debate requires at least 1 round".to_string(),
            ));
        }
        Ok(())
    }
}

/// Voting strategies for swarm decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VotingStrategy {
    /// Winner needs more than half the votes (`ceil(n * 0.5)`).
    Majority,
    /// Winner needs a two-thirds supermajority (`ceil(n * 0.67)`).
    Supermajority,
    /// Every vote must agree.
    Unanimous,
    /// Choices are scored by summed confidence.
    Weighted,
    /// First choices score full confidence; alternatives score a decaying
    /// share.
    RankedChoice,
}

/// Descriptor for a swarm vote.
///
/// Invariant: `agent_ids.len() >= 2` and
/// `confidence_threshold ∈ [0.0, 1.0]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmPattern {
    /// The question put to the swarm.
    pub question: String,
    /// Voters in polling order. At least two.
    pub agent_ids: Vec<String>,
    /// How votes are aggregated into a decision.
    pub strategy: VotingStrategy,
    /// Confidence threshold used by `Weighted` and `RankedChoice`.
    pub confidence_threshold: f64,
    /// When `true`, a second pass lets each agent revise after seeing the
    /// first-pass votes; only second-pass votes are retained.
    pub share_votes: bool,
    /// Pre-registered judge consulted when the strategy threshold is not
    /// met. When unset, an ephemeral judge may be spawned if the provider
    /// advertises a factory and policy allows it.
    pub judge_agent_id: Option<String>,
}

impl SwarmPattern {
    pub(crate) fn validate(&self) -> Result<(), WorkflowError> {
        if self.agent_ids.len() < 2 {
            return Err(WorkflowError::InvalidInput(
                "swarm requires at least 2 agents".to_string(),
            ));
        }
        Ok(())
    }
}

/// Descriptor for a pipeline: agents run as sequential stages over a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinePattern {
    /// The task handed to stage 1.
    pub task: String,
    /// Stage agents in execution order. At least one.
    pub agent_ids: Vec<String>,
}

/// Descriptor for fork-join: every branch processes the same task, then the
/// outputs are joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkJoinPattern {
    /// The task handed to every branch.
    pub task: String,
    /// Branch agents. At least two.
    pub agent_ids: Vec<String>,
    /// Optional agent asked to merge the branch outputs. When unset, the
    /// merged output is a deterministic concatenation.
    pub merge_agent_id: Option<String>,
}

/// Driver/navigator pair-programming descriptor. Public contract only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairProgrammingPattern {
    pub task: String,
    pub driver_agent_id: String,
    pub navigator_agent_id: String,
}

/// Teacher-student descriptor. Public contract only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherStudentPattern {
    pub topic: String,
    pub teacher_agent_id: String,
    pub student_agent_id: String,
}

/// One agent's stance within a debate round. Produced once per agent per
/// round, never mutated after the round closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPosition {
    /// The debater that produced this position.
    pub agent_id: String,
    /// The stated position.
    pub position: String,
    /// Supporting arguments, in the order the agent listed them.
    pub arguments: Vec<String>,
    /// Self-reported confidence as a fraction in `[0, 1]`.
    pub confidence: f64,
    /// Reactions this position received from peers in the same round,
    /// keyed by the reacting agent's id.
    pub responses: HashMap<String, String>,
    /// Reasoning trace, when the model surfaced one.
    pub thinking: Option<String>,
    /// Names of tools the agent used while forming the position.
    pub tools_used: Vec<String>,
    /// Number of tool calls made while forming the position.
    pub tool_call_count: usize,
    /// Model that produced the position.
    pub model: String,
    /// Provider that produced the position.
    pub provider: String,
}

/// One completed debate round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateRound {
    /// 1-based round number.
    pub round_number: usize,
    /// Every debater's position, in speaking order.
    pub positions: Vec<AgentPosition>,
    /// Deterministic round summary (no LLM call).
    pub synthesis: String,
    /// `true` when the round's average confidence reached `0.80`.
    pub consensus_reached: bool,
}

/// Terminal outcome of a debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateResult {
    /// Rounds actually executed (may be fewer than requested on early
    /// consensus).
    pub rounds: Vec<DebateRound>,
    /// Whether any round reached consensus.
    pub consensus_achieved: bool,
    /// The final consensus text: the deciding round's synthesis, or the
    /// moderator's synthesis when no round converged.
    pub consensus: String,
    /// The moderator's final synthesis, when a moderator was configured.
    pub moderator_synthesis: Option<String>,
}

/// One agent's vote in a swarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmVote {
    /// The voter.
    pub agent_id: String,
    /// The chosen option, as stated by the agent.
    pub choice: String,
    /// Self-reported confidence as a fraction in `[0, 1]`.
    pub confidence: f64,
    /// The agent's stated reasoning.
    pub reasoning: String,
    /// Ranked fallback choices, best first.
    pub alternatives: Vec<String>,
}

/// Terminal outcome of a swarm vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmResult {
    /// Retained votes (second-pass votes when votes were shared).
    pub votes: Vec<SwarmVote>,
    /// Vote counts keyed by normalized (trimmed, lowercased) choice.
    pub vote_distribution: HashMap<String, usize>,
    /// Mean confidence across retained votes.
    pub average_confidence: f64,
    /// The decision: the strategy winner, or the judge's answer after
    /// escalation.
    pub decision: String,
    /// Whether the strategy threshold was met (set `true` after a
    /// successful judge escalation).
    pub threshold_met: bool,
    /// Human-readable account of how the decision was reached, including
    /// judge usage, policy blocks, and soft judge failures.
    pub consensus_analysis: String,
}

/// One pipeline stage's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    /// The stage agent.
    pub agent_id: String,
    /// The stage's content, fed to the following stage.
    pub content: String,
}

/// Terminal outcome of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Stage outputs in execution order.
    pub stages: Vec<StageOutput>,
}

/// Terminal outcome of a fork-join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkJoinResult {
    /// Branch outputs in input order.
    pub branches: Vec<StageOutput>,
    /// The merge agent, when one produced the join.
    pub merge_agent_id: Option<String>,
}

/// Pattern-specific terminal payload inside a [`WorkflowResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CollaborationResult {
    Debate(DebateResult),
    Swarm(SwarmResult),
    Pipeline(PipelineResult),
    ForkJoin(ForkJoinResult),
}

/// One agent's overall contribution to a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// The contributing agent.
    pub agent_id: String,
    /// The agent's final output for this workflow (last position, retained
    /// vote choice, stage output, …).
    pub output: String,
    /// Model that produced the contribution.
    pub model: String,
    /// Provider that produced the contribution.
    pub provider: String,
}

/// Aggregated cost accounting for a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostSummary {
    /// Total dollar cost across every agent call in the workflow.
    pub total_usd: f64,
    /// Dollar cost per agent id (ephemeral roles appear under their role
    /// name).
    pub per_agent_usd: HashMap<String, f64>,
    /// Total input tokens.
    pub input_tokens: usize,
    /// Total output tokens.
    pub output_tokens: usize,
}

impl CostSummary {
    /// Fold one call's usage into the summary under `agent_id`.
    pub(crate) fn record(&mut self, agent_id: &str, usage: &Usage) {
        self.total_usd += usage.cost_usd;
        *self.per_agent_usd.entry(agent_id.to_string()).or_insert(0.0) += usage.cost_usd;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
    }
}

/// Collaboration quality metrics computed over a finished workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollaborationMetrics {
    /// How varied the agents' outputs were (`0.0` identical, `1.0`
    /// disjoint).
    pub perspective_diversity: f64,
    /// How much the agents agreed (debate: mean confidence; swarm:
    /// `1 - diversity`).
    pub agreement_level: f64,
    /// Mean character length of agent outputs.
    pub avg_response_length: f64,
    /// Total number of agent contributions.
    pub interaction_count: usize,
    /// Variance of self-reported confidences.
    pub confidence_variance: f64,
    /// Milliseconds until consensus, `0` unless a timing hook recorded it.
    pub time_to_consensus_ms: u64,
}

/// Terminal result of executing one pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Lowercase pattern label (see [`Pattern::pattern_type`]).
    pub pattern_type: String,
    /// Per-agent contributions in participation order.
    pub per_agent_results: Vec<AgentResult>,
    /// The workflow's single merged output (consensus, decision, final
    /// stage, or join).
    pub merged_output: String,
    /// Aggregated cost accounting.
    pub cost: CostSummary,
    /// Model label per agent id.
    pub models_used: HashMap<String, String>,
    /// Collaboration quality metrics.
    pub metrics: CollaborationMetrics,
    /// Wall-clock duration of the `execute` call, recorded by the engine.
    pub duration_ms: u64,
    /// Free-form key/value metadata (workflow id, judge usage, …).
    pub metadata: HashMap<String, String>,
    /// The pattern-specific terminal payload.
    pub collaboration: CollaborationResult,
}
