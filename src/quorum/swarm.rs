//! Swarm voting orchestrator.
//!
//! Every agent answers the same question with a structured vote
//! (`CHOICE:/CONFIDENCE:/REASONING:/ALTERNATIVES:`). Votes are aggregated
//! under a [`VotingStrategy`]; when the strategy threshold is not met the
//! orchestrator escalates to a judge — a pre-registered one when the
//! pattern names it, otherwise an ephemeral judge spawned through the
//! provider's factory capability under the policy evaluator's caps.
//!
//! Judge problems are soft: a missing, blocked, or failing judge leaves the
//! pre-judge decision intact and is reported in `consensus_analysis`. Vote
//! collection failures are fatal.
//!
//! The policy evaluator is reset at the start of every execution so spawn
//! budgets are per-workflow.

use crate::quorum::agent::{Agent, AgentProvider, Context};
use crate::quorum::error::WorkflowError;
use crate::quorum::expression::EvaluationContext;
use crate::quorum::pattern::{
    AgentResult, CollaborationMetrics, CollaborationResult, CostSummary, SwarmPattern,
    SwarmResult, SwarmVote, VotingStrategy, WorkflowResult,
};
use crate::quorum::policy::{EphemeralAgentPolicy, PolicyEvaluator, SpawnDecision};
use crate::quorum::progress::{NoopProgressSink, ProgressEvent, ProgressSink, Stage};
use crate::quorum::trace::Tracer;
use std::collections::HashMap;
use std::sync::Arc;

/// Confidence assumed when a vote omits or garbles its `CONFIDENCE:` line.
const DEFAULT_CONFIDENCE_PCT: f64 = 75.0;

/// Orchestrates swarm votes, strategy aggregation, and judge escalation.
pub struct SwarmOrchestrator {
    provider: Arc<dyn AgentProvider>,
    tracer: Arc<dyn Tracer>,
    policy: Arc<PolicyEvaluator>,
    judge_policy: EphemeralAgentPolicy,
    sink: Arc<dyn ProgressSink>,
}

impl SwarmOrchestrator {
    pub fn new(
        provider: Arc<dyn AgentProvider>,
        tracer: Arc<dyn Tracer>,
        policy: Arc<PolicyEvaluator>,
    ) -> Self {
        Self {
            provider,
            tracer,
            policy,
            judge_policy: EphemeralAgentPolicy::default_judge(),
            sink: Arc::new(NoopProgressSink),
        }
    }

    /// Replace the default judge policy (builder pattern).
    pub fn with_judge_policy(mut self, policy: EphemeralAgentPolicy) -> Self {
        self.judge_policy = policy;
        self
    }

    /// Stream staged progress to `sink` during execution (builder pattern).
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Shared accounting for ephemeral spawns; callers can inspect spawn
    /// stats after an execution.
    pub fn policy_evaluator(&self) -> &Arc<PolicyEvaluator> {
        &self.policy
    }

    /// Run the swarm to a terminal [`WorkflowResult`].
    pub async fn execute(
        &self,
        ctx: &Context,
        workflow_id: &str,
        pattern: &SwarmPattern,
    ) -> Result<WorkflowResult, WorkflowError> {
        // Spawn budgets are per-workflow; stale counters from a previous
        // execution must not leak in.
        self.policy.reset();
        pattern.validate()?;

        let mut voters: Vec<(String, Arc<dyn Agent>)> = Vec::new();
        for id in &pattern.agent_ids {
            let agent = self.provider.get_agent(ctx, id).await?;
            voters.push((id.clone(), agent));
        }

        let mut cost = CostSummary::default();
        let mut models_used: HashMap<String, String> = HashMap::new();

        // First pass: independent votes with no peer context.
        let first_pass = self
            .collect_votes(ctx, workflow_id, pattern, &voters, None, &mut cost, &mut models_used)
            .await?;

        // When votes are shared, a second pass lets every agent revise after
        // seeing the first-pass results; only the revised votes count.
        let votes = if pattern.share_votes {
            self.collect_votes(
                ctx,
                workflow_id,
                pattern,
                &voters,
                Some(&first_pass),
                &mut cost,
                &mut models_used,
            )
            .await?
        } else {
            first_pass
        };

        let distribution = vote_distribution(&votes);
        let average_confidence = if votes.is_empty() {
            0.0
        } else {
            votes.iter().map(|v| v.confidence).sum::<f64>() / votes.len() as f64
        };
        let tie_detected = detect_tie(&distribution);

        let outcome = apply_strategy(pattern, &votes, &distribution);
        let mut decision = outcome.decision;
        let mut threshold_met = outcome.threshold_met;
        let mut analysis = outcome.analysis;

        if !threshold_met {
            let eval_ctx = EvaluationContext {
                consensus_reached: false,
                average_confidence: Some(average_confidence),
                tie_detected,
                total_votes: Some(votes.len()),
                winning_vote_count: distribution.values().max().copied(),
                escalation_requested: false,
                custom_fields: HashMap::new(),
            };

            match self
                .escalate_to_judge(ctx, workflow_id, pattern, &votes, &distribution, &eval_ctx, &mut cost)
                .await
            {
                JudgeOutcome::Decided { choice, judge_label } => {
                    decision = choice;
                    threshold_met = true;
                    analysis.push_str(&format!("; judge '{}' decided", judge_label));
                }
                JudgeOutcome::NotUsed { reason } => {
                    analysis.push_str(&format!("; judge not used: {}", reason));
                }
                JudgeOutcome::Failed { error } => {
                    analysis.push_str(&format!("; judge failed: {}", error));
                }
            }
        }

        let metrics = compute_metrics(&votes, &distribution);
        let per_agent_results = votes
            .iter()
            .map(|v| AgentResult {
                agent_id: v.agent_id.clone(),
                output: v.choice.clone(),
                model: models_used.get(&v.agent_id).cloned().unwrap_or_default(),
                provider: String::new(),
            })
            .collect();

        let mut metadata = HashMap::new();
        metadata.insert("workflow_id".to_string(), workflow_id.to_string());
        metadata.insert("strategy".to_string(), format!("{:?}", pattern.strategy));

        Ok(WorkflowResult {
            pattern_type: "swarm".to_string(),
            per_agent_results,
            merged_output: decision.clone(),
            cost,
            models_used,
            metrics,
            duration_ms: 0,
            metadata,
            collaboration: CollaborationResult::Swarm(SwarmResult {
                votes,
                vote_distribution: distribution,
                average_confidence,
                decision,
                threshold_met,
                consensus_analysis: analysis,
            }),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn collect_votes(
        &self,
        ctx: &Context,
        workflow_id: &str,
        pattern: &SwarmPattern,
        voters: &[(String, Arc<dyn Agent>)],
        prior_votes: Option<&[SwarmVote]>,
        cost: &mut CostSummary,
        models_used: &mut HashMap<String, String>,
    ) -> Result<Vec<SwarmVote>, WorkflowError> {
        let span = self.tracer.start_span("swarm.vote_collection");
        let pass = if prior_votes.is_some() { 2 } else { 1 };
        span.set_attribute("pass", &pass.to_string());

        let mut votes = Vec::new();
        for (idx, (agent_id, agent)) in voters.iter().enumerate() {
            ctx.check()?;
            self.sink
                .emit(
                    ProgressEvent::stage(
                        Stage::LLMGeneration,
                        format!("Collecting vote from {}", agent_id),
                    )
                    .with_progress_pct((idx * 100 / voters.len()) as u8)
                    .with_cost(cost.total_usd),
                )
                .await;

            let prompt = vote_prompt(&pattern.question, prior_votes);
            let (purpose, round) = if prior_votes.is_some() {
                ("revote", 2)
            } else {
                ("vote", 1)
            };
            let session_id = format!("{}-round{}-{}-{}", workflow_id, round, agent_id, purpose);

            let response = agent.chat(ctx, &session_id, &prompt).await.map_err(|e| {
                span.record_error(&e);
                WorkflowError::AgentCallFailed {
                    agent_id: agent_id.clone(),
                    message: format!("vote pass {} failed: {}", pass, e),
                }
            })?;

            cost.record(agent_id, &response.usage);
            models_used.insert(agent_id.clone(), response.model.clone());
            votes.push(parse_vote(agent_id, &response.content));
        }
        span.end();
        Ok(votes)
    }

    #[allow(clippy::too_many_arguments)]
    async fn escalate_to_judge(
        &self,
        ctx: &Context,
        workflow_id: &str,
        pattern: &SwarmPattern,
        votes: &[SwarmVote],
        distribution: &HashMap<String, usize>,
        eval_ctx: &EvaluationContext,
        cost: &mut CostSummary,
    ) -> JudgeOutcome {
        let span = self.tracer.start_span("swarm.judge_escalation");

        // Pre-registered judge wins over ephemeral spawning.
        let (judge, judge_label, ephemeral): (Arc<dyn Agent>, String, bool) =
            if let Some(judge_id) = &pattern.judge_agent_id {
                match self.provider.get_agent(ctx, judge_id).await {
                    Ok(agent) => (agent, judge_id.clone(), false),
                    Err(e) => {
                        span.record_error(&e);
                        span.end();
                        return JudgeOutcome::Failed {
                            error: e.to_string(),
                        };
                    }
                }
            } else if let Some(factory) = self.provider.ephemeral_factory() {
                match self.policy.should_spawn(&self.judge_policy, eval_ctx) {
                    SpawnDecision::Allowed => {
                        match factory
                            .create_ephemeral_agent(ctx, &self.judge_policy.role)
                            .await
                        {
                            Ok(agent) => (agent, self.judge_policy.role.clone(), true),
                            Err(e) => {
                                span.record_error(&e);
                                span.end();
                                return JudgeOutcome::Failed {
                                    error: e.to_string(),
                                };
                            }
                        }
                    }
                    SpawnDecision::Blocked(reason) => {
                        log::info!("judge spawn blocked: {}", reason);
                        span.end();
                        return JudgeOutcome::NotUsed { reason };
                    }
                }
            } else {
                span.end();
                return JudgeOutcome::NotUsed {
                    reason: "no judge registered and provider has no factory".to_string(),
                };
            };

        let prompt = judge_prompt(&pattern.question, votes, distribution);
        let session_id = format!("{}-round1-{}-judge", workflow_id, judge_label);
        let result = judge.chat(ctx, &session_id, &prompt).await;
        span.end();

        match result {
            Ok(response) => {
                cost.record(&judge_label, &response.usage);
                if ephemeral {
                    self.policy
                        .record_spawn(&self.judge_policy.role, response.usage.cost_usd);
                }
                JudgeOutcome::Decided {
                    choice: response.content.trim().to_string(),
                    judge_label,
                }
            }
            Err(e) => JudgeOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}

enum JudgeOutcome {
    Decided { choice: String, judge_label: String },
    NotUsed { reason: String },
    Failed { error: String },
}

fn vote_prompt(question: &str, prior_votes: Option<&[SwarmVote]>) -> String {
    let mut prompt = format!(
        "Question: {}\n\nReply using exactly this format:\n\
         CHOICE: <your choice>\n\
         CONFIDENCE: <0-100>\n\
         REASONING: <why>\n\
         ALTERNATIVES: <comma-separated fallback choices>",
        question
    );
    if let Some(votes) = prior_votes {
        prompt.push_str("\n\nFirst-pass votes:\n");
        for vote in votes {
            prompt.push_str(&format!(
                "- {}: {} ({:.0}%) — {}\n",
                vote.agent_id,
                vote.choice,
                vote.confidence * 100.0,
                vote.reasoning
            ));
        }
        prompt.push_str("You may revise your vote after considering the votes above.");
    }
    prompt
}

fn judge_prompt(
    question: &str,
    votes: &[SwarmVote],
    distribution: &HashMap<String, usize>,
) -> String {
    let mut prompt = format!("The swarm could not reach a decision on: {}\n\nVotes:\n", question);
    for vote in votes {
        prompt.push_str(&format!(
            "- {}: {} ({:.0}%) — {}\n",
            vote.agent_id,
            vote.choice,
            vote.confidence * 100.0,
            vote.reasoning
        ));
    }
    // Count-descending; ties broken alphabetically so the prompt is stable.
    let mut sorted: Vec<(&String, &usize)> = distribution.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    prompt.push_str("\nVote distribution:\n");
    for (choice, count) in sorted {
        prompt.push_str(&format!("- {}: {}\n", choice, count));
    }
    prompt.push_str("\nAs the judge, decide the outcome. Reply with the winning choice only.");
    prompt
}

/// Parse a structured `CHOICE:/CONFIDENCE:/REASONING:/ALTERNATIVES:` reply.
/// A missing `CHOICE` token makes the trimmed response the choice; a missing
/// or unparsable `CONFIDENCE` defaults to 75%.
pub(crate) fn parse_vote(agent_id: &str, content: &str) -> SwarmVote {
    let mut choice: Option<String> = None;
    let mut confidence_pct: Option<f64> = None;
    let mut reasoning_lines: Vec<String> = Vec::new();
    let mut alternatives: Vec<String> = Vec::new();
    let mut in_reasoning = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(rest) = strip_token(trimmed, "CHOICE:") {
            in_reasoning = false;
            choice = Some(rest.to_string());
        } else if let Some(rest) = strip_token(trimmed, "CONFIDENCE:") {
            in_reasoning = false;
            confidence_pct = parse_confidence(rest);
        } else if let Some(rest) = strip_token(trimmed, "REASONING:") {
            in_reasoning = true;
            if !rest.is_empty() {
                reasoning_lines.push(rest.to_string());
            }
        } else if let Some(rest) = strip_token(trimmed, "ALTERNATIVES:") {
            in_reasoning = false;
            alternatives = rest
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        } else if in_reasoning && !trimmed.is_empty() {
            reasoning_lines.push(trimmed.to_string());
        }
    }

    let pct = confidence_pct.unwrap_or(DEFAULT_CONFIDENCE_PCT);
    SwarmVote {
        agent_id: agent_id.to_string(),
        choice: choice.unwrap_or_else(|| content.trim().to_string()),
        confidence: (pct / 100.0).clamp(0.0, 1.0),
        reasoning: reasoning_lines.join(" "),
        alternatives,
    }
}

fn strip_token<'a>(line: &'a str, token: &str) -> Option<&'a str> {
    match line.get(..token.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(token) => Some(line[token.len()..].trim()),
        _ => None,
    }
}

fn parse_confidence(rest: &str) -> Option<f64> {
    let cleaned = rest.trim().trim_end_matches('%').trim();
    let value: f64 = cleaned.parse().ok()?;
    if value <= 1.0 {
        Some(value * 100.0)
    } else {
        Some(value)
    }
}

/// Trim + lowercase, the normalization applied before counting.
pub(crate) fn normalize_choice(choice: &str) -> String {
    choice.trim().to_lowercase()
}

pub(crate) fn vote_distribution(votes: &[SwarmVote]) -> HashMap<String, usize> {
    let mut distribution = HashMap::new();
    for vote in votes {
        *distribution.entry(normalize_choice(&vote.choice)).or_insert(0) += 1;
    }
    distribution
}

/// A tie is two or more choices sharing the maximum count.
pub(crate) fn detect_tie(distribution: &HashMap<String, usize>) -> bool {
    let max = distribution.values().max().copied().unwrap_or(0);
    max > 0 && distribution.values().filter(|&&c| c == max).count() >= 2
}

pub(crate) struct StrategyOutcome {
    pub decision: String,
    pub threshold_met: bool,
    pub analysis: String,
}

/// Aggregate votes under the pattern's strategy.
pub(crate) fn apply_strategy(
    pattern: &SwarmPattern,
    votes: &[SwarmVote],
    distribution: &HashMap<String, usize>,
) -> StrategyOutcome {
    match pattern.strategy {
        VotingStrategy::Majority => apply_count_threshold(votes, distribution, 0.5, "majority"),
        VotingStrategy::Supermajority => {
            apply_count_threshold(votes, distribution, 0.67, "supermajority")
        }
        VotingStrategy::Unanimous => apply_count_threshold(votes, distribution, 1.0, "unanimous"),
        VotingStrategy::Weighted => {
            let mut scores: HashMap<String, f64> = HashMap::new();
            for vote in votes {
                *scores.entry(normalize_choice(&vote.choice)).or_insert(0.0) += vote.confidence;
            }
            apply_score_threshold(votes, scores, pattern.confidence_threshold, "weighted")
        }
        VotingStrategy::RankedChoice => {
            let mut scores: HashMap<String, f64> = HashMap::new();
            for vote in votes {
                *scores.entry(normalize_choice(&vote.choice)).or_insert(0.0) += vote.confidence;
                let n = vote.alternatives.len();
                for (i, alternative) in vote.alternatives.iter().enumerate() {
                    let weight = vote.confidence * (n - i) as f64 / (n + 1) as f64;
                    *scores.entry(normalize_choice(alternative)).or_insert(0.0) += weight;
                }
            }
            apply_score_threshold(votes, scores, pattern.confidence_threshold, "ranked choice")
        }
    }
}

fn apply_count_threshold(
    votes: &[SwarmVote],
    distribution: &HashMap<String, usize>,
    threshold: f64,
    name: &str,
) -> StrategyOutcome {
    let total = votes.len();
    let required = (total as f64 * threshold).ceil() as usize;
    let winner = winning_choice(votes, |choice| {
        distribution.get(choice).copied().unwrap_or(0) as f64
    });
    let max_count = distribution.get(&winner).copied().unwrap_or(0);
    StrategyOutcome {
        decision: winner.clone(),
        threshold_met: max_count >= required,
        analysis: format!(
            "{} vote: '{}' held {}/{} votes (required {})",
            name, winner, max_count, total, required
        ),
    }
}

fn apply_score_threshold(
    votes: &[SwarmVote],
    scores: HashMap<String, f64>,
    confidence_threshold: f64,
    name: &str,
) -> StrategyOutcome {
    let total = votes.len();
    let winner = winning_choice(votes, |choice| scores.get(choice).copied().unwrap_or(0.0));
    let max_score = scores.get(&winner).copied().unwrap_or(0.0);
    let normalized = if total > 0 {
        max_score / total as f64
    } else {
        0.0
    };
    StrategyOutcome {
        decision: winner.clone(),
        threshold_met: normalized >= confidence_threshold,
        analysis: format!(
            "{} vote: '{}' scored {:.2} across {} votes ({:.2} normalized, required {:.2})",
            name, winner, max_score, total, normalized, confidence_threshold
        ),
    }
}

/// Highest-scoring normalized choice; equal scores are broken by first
/// appearance in vote order so results are reproducible.
fn winning_choice<F: Fn(&str) -> f64>(votes: &[SwarmVote], score: F) -> String {
    let mut seen: Vec<String> = Vec::new();
    for vote in votes {
        let normalized = normalize_choice(&vote.choice);
        if !seen.contains(&normalized) {
            seen.push(normalized);
        }
        for alternative in &vote.alternatives {
            let normalized = normalize_choice(alternative);
            if !seen.contains(&normalized) {
                seen.push(normalized);
            }
        }
    }
    let mut best: Option<(&String, f64)> = None;
    for choice in &seen {
        let s = score(choice);
        match best {
            Some((_, best_score)) if s <= best_score => {}
            _ => best = Some((choice, s)),
        }
    }
    best.map(|(c, _)| c.clone()).unwrap_or_default()
}

fn compute_metrics(
    votes: &[SwarmVote],
    distribution: &HashMap<String, usize>,
) -> CollaborationMetrics {
    if votes.is_empty() {
        return CollaborationMetrics::default();
    }
    let diversity = distribution.len() as f64 / votes.len() as f64;
    let mean = votes.iter().map(|v| v.confidence).sum::<f64>() / votes.len() as f64;
    let variance = votes
        .iter()
        .map(|v| (v.confidence - mean).powi(2))
        .sum::<f64>()
        / votes.len() as f64;
    let avg_response_length = votes
        .iter()
        .map(|v| v.reasoning.chars().count())
        .sum::<usize>() as f64
        / votes.len() as f64;

    CollaborationMetrics {
        perspective_diversity: diversity,
        agreement_level: 1.0 - diversity,
        avg_response_length,
        interaction_count: votes.len(),
        confidence_variance: variance,
        time_to_consensus_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(agent: &str, choice: &str, confidence: f64) -> SwarmVote {
        SwarmVote {
            agent_id: agent.to_string(),
            choice: choice.to_string(),
            confidence,
            reasoning: String::new(),
            alternatives: Vec::new(),
        }
    }

    fn pattern(strategy: VotingStrategy, threshold: f64) -> SwarmPattern {
        SwarmPattern {
            question: "q".to_string(),
            agent_ids: vec!["a".to_string(), "b".to_string()],
            strategy,
            confidence_threshold: threshold,
            share_votes: false,
            judge_agent_id: None,
        }
    }

    #[test]
    fn test_parse_vote_full() {
        let parsed = parse_vote(
            "a1",
            "CHOICE: PostgreSQL\nCONFIDENCE: 80\nREASONING: Mature and\nwell supported\nALTERNATIVES: MySQL, SQLite",
        );
        assert_eq!(parsed.choice, "PostgreSQL");
        assert!((parsed.confidence - 0.80).abs() < 1e-9);
        assert_eq!(parsed.reasoning, "Mature and well supported");
        assert_eq!(parsed.alternatives, vec!["MySQL".to_string(), "SQLite".to_string()]);
    }

    #[test]
    fn test_parse_vote_defaults() {
        let parsed = parse_vote("a1", "Just use Redis");
        assert_eq!(parsed.choice, "Just use Redis");
        assert!((parsed.confidence - 0.75).abs() < 1e-9);
        assert!(parsed.alternatives.is_empty());
    }

    #[test]
    fn test_distribution_counts_normalized() {
        let votes = vec![
            vote("a", " PostgreSQL ", 0.8),
            vote("b", "postgresql", 0.7),
            vote("c", "MySQL", 0.75),
        ];
        let distribution = vote_distribution(&votes);
        assert_eq!(distribution.get("postgresql"), Some(&2));
        assert_eq!(distribution.get("mysql"), Some(&1));
        assert_eq!(distribution.values().sum::<usize>(), votes.len());
    }

    #[test]
    fn test_detect_tie() {
        let votes = vec![vote("a", "x", 0.8), vote("b", "y", 0.8)];
        assert!(detect_tie(&vote_distribution(&votes)));
        let votes = vec![vote("a", "x", 0.8), vote("b", "x", 0.8), vote("c", "y", 0.8)];
        assert!(!detect_tie(&vote_distribution(&votes)));
    }

    #[test]
    fn test_majority_boundaries() {
        // 3/5 agreeing: majority met, supermajority not, unanimous not.
        let votes = vec![
            vote("a", "x", 0.8),
            vote("b", "x", 0.8),
            vote("c", "x", 0.8),
            vote("d", "y", 0.8),
            vote("e", "z", 0.8),
        ];
        let distribution = vote_distribution(&votes);

        let outcome = apply_strategy(&pattern(VotingStrategy::Majority, 0.5), &votes, &distribution);
        assert_eq!(outcome.decision, "x");
        assert!(outcome.threshold_met);

        let outcome = apply_strategy(
            &pattern(VotingStrategy::Supermajority, 0.67),
            &votes,
            &distribution,
        );
        assert!(!outcome.threshold_met);

        let outcome =
            apply_strategy(&pattern(VotingStrategy::Unanimous, 1.0), &votes, &distribution);
        assert!(!outcome.threshold_met);
    }

    #[test]
    fn test_unanimous_all_agreeing() {
        let votes = vec![vote("a", "x", 0.9), vote("b", "X ", 0.7)];
        let distribution = vote_distribution(&votes);
        let outcome =
            apply_strategy(&pattern(VotingStrategy::Unanimous, 1.0), &votes, &distribution);
        assert!(outcome.threshold_met);
        assert_eq!(outcome.decision, "x");
    }

    #[test]
    fn test_weighted_strategy() {
        let votes = vec![vote("a", "A", 0.95), vote("b", "B", 0.85), vote("c", "B", 0.90)];
        let distribution = vote_distribution(&votes);
        let outcome =
            apply_strategy(&pattern(VotingStrategy::Weighted, 0.5), &votes, &distribution);
        assert_eq!(outcome.decision, "b");
        assert!(outcome.threshold_met);
    }

    #[test]
    fn test_ranked_choice_alternatives_score() {
        let mut first = vote("a", "x", 0.9);
        first.alternatives = vec!["y".to_string(), "z".to_string()];
        // y gets 0.9 * 2/3 = 0.6 from a's alternatives plus 0.8 as b's
        // first choice: 1.4 total, beating x's 0.9.
        let votes = vec![first, vote("b", "y", 0.8)];
        let distribution = vote_distribution(&votes);
        let outcome = apply_strategy(
            &pattern(VotingStrategy::RankedChoice, 0.5),
            &votes,
            &distribution,
        );
        assert_eq!(outcome.decision, "y");
        assert!(outcome.threshold_met);
    }

    #[test]
    fn test_winner_tie_break_is_vote_order() {
        let votes = vec![vote("a", "beta", 0.8), vote("b", "alpha", 0.8)];
        let distribution = vote_distribution(&votes);
        let outcome =
            apply_strategy(&pattern(VotingStrategy::Majority, 0.5), &votes, &distribution);
        assert_eq!(outcome.decision, "beta");
    }

    #[test]
    fn test_metrics_invariants() {
        let votes = vec![vote("a", "x", 0.9), vote("b", "y", 0.5), vote("c", "x", 0.7)];
        let distribution = vote_distribution(&votes);
        let metrics = compute_metrics(&votes, &distribution);
        assert!((metrics.perspective_diversity - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.agreement_level - (1.0 - 2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(metrics.interaction_count, 3);
        assert!(metrics.confidence_variance > 0.0);
    }
}
