//! Debate orchestrator.
//!
//! Runs a bounded number of rounds in which every debater states a
//! structured position (`POSITION:/ARGUMENTS:/CONFIDENCE:`), optionally
//! reacts to its peers, and the round is summarized deterministically.
//! Consensus is declared when a round's average confidence reaches `0.80`;
//! the rounds loop stops early at that point. A configured moderator can be
//! asked for a final synthesis over the full round history, which becomes
//! the consensus when no round converged on its own.
//!
//! Agent calls run sequentially in input order so positions are
//! reproducible. A debater failure in the primary pass is fatal for the
//! debate; failures in the reactive second pass are swallowed (the round
//! still completes); a moderator failure during final synthesis is fatal.
//!
//! Prompt sizes are kept bounded by compressing prior-round history: short
//! positions are restated verbatim, long ones are summarized by the internal
//! moderator (falling back to sentence-boundary truncation when that call
//! fails).

use crate::quorum::agent::{Agent, AgentProvider, Context};
use crate::quorum::error::WorkflowError;
use crate::quorum::pattern::{
    AgentPosition, AgentResult, CollaborationMetrics, CollaborationResult, CostSummary,
    DebatePattern, DebateResult, DebateRound, WorkflowResult,
};
use crate::quorum::progress::{NoopProgressSink, ProgressEvent, ProgressSink, Stage};
use crate::quorum::trace::Tracer;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Arc;

/// Consensus is reached when a round's average confidence meets this bar.
const CONSENSUS_THRESHOLD: f64 = 0.80;

/// Confidence assumed when an agent omits or garbles its `CONFIDENCE:` line.
const DEFAULT_CONFIDENCE_PCT: f64 = 75.0;

lazy_static! {
    /// Domain hints keyed by the trailing word of an agent id. An id like
    /// `"reviewer-performance"` gets the performance angle; ids with no
    /// recognized suffix get a generic nudge.
    static ref PERSPECTIVE_HINTS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert(
            "performance",
            "Approach this from a performance angle: latency, throughput, and scalability.",
        );
        m.insert(
            "analytics",
            "Approach this from an analytics angle: what the data would show and how to measure it.",
        );
        m.insert(
            "quality",
            "Approach this from a quality angle: correctness, maintainability, and failure modes.",
        );
        m.insert(
            "architecture",
            "Approach this from an architecture angle: boundaries, coupling, and long-term evolution.",
        );
        m.insert(
            "security",
            "Approach this from a security angle: attack surface, trust boundaries, and data exposure.",
        );
        m.insert(
            "cost",
            "Approach this from a cost angle: build effort, operational spend, and total cost of ownership.",
        );
        m.insert(
            "testing",
            "Approach this from a testing angle: verifiability, coverage, and regression risk.",
        );
        m.insert(
            "ux",
            "Approach this from a user-experience angle: ergonomics, clarity, and friction.",
        );
        m.insert(
            "data",
            "Approach this from a data angle: modeling, consistency, and migration paths.",
        );
        m.insert(
            "infrastructure",
            "Approach this from an infrastructure angle: deployment, reliability, and capacity.",
        );
        m
    };
}

/// Orchestrates multi-round debates between registered agents.
pub struct DebateOrchestrator {
    provider: Arc<dyn AgentProvider>,
    tracer: Arc<dyn Tracer>,
    sink: Arc<dyn ProgressSink>,
}

impl DebateOrchestrator {
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

    /// Run the debate to a terminal [`WorkflowResult`].
    ///
    /// `workflow_id` prefixes every derived session id
    /// (`<workflow>-round<n>-<agent>-<purpose>`).
    pub async fn execute(
        &self,
        ctx: &Context,
        workflow_id: &str,
        pattern: &DebatePattern,
    ) -> Result<WorkflowResult, WorkflowError> {
        pattern.validate()?;

        // Resolve all debaters up front so a bad id fails before any LLM
        // spend.
        let mut debaters: Vec<(String, Arc<dyn Agent>)> = Vec::new();
        for id in &pattern.agent_ids {
            let agent = self.provider.get_agent(ctx, id).await?;
            debaters.push((id.clone(), agent));
        }

        // The internal moderator handles summarization and synthesis. Fall
        // back to the first debater when no moderator was given or the given
        // one does not resolve.
        let moderator: (String, Arc<dyn Agent>) = match &pattern.moderator_agent_id {
            Some(id) => match self.provider.get_agent(ctx, id).await {
                Ok(agent) => (id.clone(), agent),
                Err(e) => {
                    log::warn!(
                        "moderator '{}' could not be resolved ({}), falling back to '{}'",
                        id,
                        e,
                        debaters[0].0
                    );
                    debaters[0].clone()
                }
            },
            None => debaters[0].clone(),
        };

        let mut cost = CostSummary::default();
        let mut models_used: HashMap<String, String> = HashMap::new();
        let mut rounds: Vec<DebateRound> = Vec::new();
        let mut round_summaries: Vec<String> = Vec::new();
        let total_calls = pattern.rounds * debaters.len();

        for round_number in 1..=pattern.rounds {
            ctx.check()?;
            let span = self.tracer.start_span("debate.round");
            span.set_attribute("round", &round_number.to_string());

            let round_prompt = self.build_round_prompt(pattern, round_number, &round_summaries);
            let mut positions: Vec<AgentPosition> = Vec::new();

            for (idx, (agent_id, agent)) in debaters.iter().enumerate() {
                ctx.check()?;
                let pct = (((round_number - 1) * debaters.len() + idx) * 100 / total_calls) as u8;
                self.sink
                    .emit(
                        ProgressEvent::stage(
                            Stage::LLMGeneration,
                            format!("Round {}: {} stating position", round_number, agent_id),
                        )
                        .with_progress_pct(pct)
                        .with_cost(cost.total_usd),
                    )
                    .await;

                let session_id =
                    format!("{}-round{}-{}-position", workflow_id, round_number, agent_id);
                let prompt = format!(
                    "{}\n\n{}\n\n{}",
                    round_prompt,
                    perspective_guidance(agent_id),
                    position_format_instructions()
                );

                let response = agent.chat(ctx, &session_id, &prompt).await.map_err(|e| {
                    span.record_error(&e);
                    WorkflowError::AgentCallFailed {
                        agent_id: agent_id.clone(),
                        message: format!("round {} failed: {}", round_number, e),
                    }
                })?;

                cost.record(agent_id, &response.usage);
                models_used.insert(agent_id.clone(), response.model.clone());

                let (position, arguments, confidence) = parse_position_response(&response.content);
                positions.push(AgentPosition {
                    agent_id: agent_id.clone(),
                    position,
                    arguments,
                    confidence,
                    responses: HashMap::new(),
                    thinking: response.thinking.clone(),
                    tools_used: response
                        .tool_executions
                        .iter()
                        .map(|t| t.tool_name.clone())
                        .collect(),
                    tool_call_count: response.tool_executions.len(),
                    model: response.model,
                    provider: response.provider,
                });
            }

            // Reactive pass: from round 2 on, every debater may respond to
            // this round's peer positions. Failures here are swallowed.
            if round_number > 1 {
                for (agent_id, agent) in &debaters {
                    ctx.check()?;
                    let peers: Vec<&AgentPosition> = positions
                        .iter()
                        .filter(|p| &p.agent_id != agent_id)
                        .collect();
                    if peers.is_empty() {
                        continue;
                    }
                    let mut prompt = String::from("Other debaters' positions this round:\n");
                    for peer in &peers {
                        prompt.push_str(&format!("[{}] {}\n", peer.agent_id, peer.position));
                    }
                    prompt.push_str(
                        "\nRespond to the positions above. Acknowledge strong points and \
                         challenge weak ones.",
                    );

                    let session_id =
                        format!("{}-round{}-{}-reaction", workflow_id, round_number, agent_id);
                    match agent.chat(ctx, &session_id, &prompt).await {
                        Ok(response) => {
                            cost.record(agent_id, &response.usage);
                            let reaction = response.content;
                            for position in positions.iter_mut() {
                                if &position.agent_id != agent_id {
                                    position
                                        .responses
                                        .insert(agent_id.clone(), reaction.clone());
                                }
                            }
                        }
                        Err(e) => {
                            log::warn!(
                                "reactive response from '{}' in round {} dropped: {}",
                                agent_id,
                                round_number,
                                e
                            );
                        }
                    }
                }
            }

            let synthesis = synthesize_round(round_number, &positions);
            let average = average_confidence(&positions);
            let consensus_reached = average >= CONSENSUS_THRESHOLD;
            span.set_attribute("consensus", &consensus_reached.to_string());
            span.end();

            // Compress this round for later prompts before the positions
            // move into the result. The last round has no consumer.
            if !consensus_reached && round_number < pattern.rounds {
                round_summaries.push(
                    self.compress_round(
                        ctx,
                        workflow_id,
                        round_number,
                        &positions,
                        &moderator,
                        &mut cost,
                    )
                    .await,
                );
            }

            log::info!(
                "debate round {}/{} complete: avg confidence {:.2}, consensus={}",
                round_number,
                pattern.rounds,
                average,
                consensus_reached
            );

            rounds.push(DebateRound {
                round_number,
                positions,
                synthesis,
                consensus_reached,
            });

            if consensus_reached {
                break;
            }
        }

        let consensus_achieved = rounds.iter().any(|r| r.consensus_reached);

        // Final moderator synthesis over the full history, only when a
        // moderator was explicitly configured.
        let moderator_synthesis = if pattern.moderator_agent_id.is_some() {
            ctx.check()?;
            let prompt = moderator_synthesis_prompt(&pattern.topic, &rounds);
            let session_id = format!("{}-final-{}-moderator", workflow_id, moderator.0);
            let response = moderator
                .1
                .chat(ctx, &session_id, &prompt)
                .await
                .map_err(|e| WorkflowError::ModeratorFailed(e.to_string()))?;
            cost.record(&moderator.0, &response.usage);
            models_used.insert(moderator.0.clone(), response.model.clone());
            Some(response.content)
        } else {
            None
        };

        let final_synthesis = rounds
            .last()
            .map(|r| r.synthesis.clone())
            .unwrap_or_default();
        let consensus = if consensus_achieved {
            final_synthesis
        } else {
            moderator_synthesis.clone().unwrap_or(final_synthesis)
        };

        let metrics = compute_metrics(&rounds);
        let per_agent_results = last_positions(&pattern.agent_ids, &rounds);

        let mut metadata = HashMap::new();
        metadata.insert("workflow_id".to_string(), workflow_id.to_string());
        metadata.insert("rounds_executed".to_string(), rounds.len().to_string());

        Ok(WorkflowResult {
            pattern_type: "debate".to_string(),
            per_agent_results,
            merged_output: consensus.clone(),
            cost,
            models_used,
            metrics,
            duration_ms: 0,
            metadata,
            collaboration: CollaborationResult::Debate(DebateResult {
                rounds,
                consensus_achieved,
                consensus,
                moderator_synthesis,
            }),
        })
    }

    fn build_round_prompt(
        &self,
        pattern: &DebatePattern,
        round_number: usize,
        round_summaries: &[String],
    ) -> String {
        let mut prompt = format!(
            "Debate topic: {}\n\nRound {} of {}.",
            pattern.topic, round_number, pattern.rounds
        );
        if !round_summaries.is_empty() {
            prompt.push_str("\n\nPrior rounds:\n");
            for summary in round_summaries {
                prompt.push_str(summary);
                prompt.push('\n');
            }
        }
        prompt
    }

    /// Compress one finished round into a bounded per-agent summary block.
    async fn compress_round(
        &self,
        ctx: &Context,
        workflow_id: &str,
        round_number: usize,
        positions: &[AgentPosition],
        moderator: &(String, Arc<dyn Agent>),
        cost: &mut CostSummary,
    ) -> String {
        let mut block = format!("Round {}:\n", round_number);
        for position in positions {
            let restated = if position.position.chars().count() <= 250
                && position.arguments.len() <= 2
            {
                let mut text = position.position.clone();
                for arg in &position.arguments {
                    text.push_str(&format!(" • {}", truncate_chars(arg, 150)));
                }
                text
            } else {
                let prompt = format!(
                    "Summarize the following debate position in at most 200 characters. \
                     Reply with the summary only.\n\nPosition: {}\nArguments:\n{}",
                    position.position,
                    position
                        .arguments
                        .iter()
                        .map(|a| format!("- {}", a))
                        .collect::<Vec<_>>()
                        .join("\n")
                );
                let session_id = format!(
                    "{}-round{}-{}-summary",
                    workflow_id, round_number, position.agent_id
                );
                match moderator.1.chat(ctx, &session_id, &prompt).await {
                    Ok(response) => {
                        cost.record(&moderator.0, &response.usage);
                        truncate_at_sentence(response.content.trim(), 250, 300)
                    }
                    Err(e) => {
                        log::warn!(
                            "summary call for '{}' failed ({}), truncating instead",
                            position.agent_id,
                            e
                        );
                        truncate_at_sentence(&position.position, 200, 250)
                    }
                }
            };
            block.push_str(&format!(
                "- {} ({:.0}% confident): {}\n",
                position.agent_id,
                position.confidence * 100.0,
                restated
            ));
        }
        block
    }
}

/// Perspective-guidance suffix derived from the trailing word of the agent
/// id.
pub(crate) fn perspective_guidance(agent_id: &str) -> &'static str {
    let suffix = agent_id.rsplit('-').next().unwrap_or("").to_lowercase();
    PERSPECTIVE_HINTS
        .get(suffix.as_str())
        .copied()
        .unwrap_or("Approach this from your unique angle.")
}

fn position_format_instructions() -> &'static str {
    "State your stance using exactly this format:\n\
     POSITION: <your position in one or two sentences>\n\
     ARGUMENTS:\n\
     - <argument 1>\n\
     - <argument 2>\n\
     CONFIDENCE: <0-100>"
}

/// Parse a structured `POSITION:/ARGUMENTS:/CONFIDENCE:` reply.
///
/// Tokens are recognized case-insensitively at line start. A missing
/// `POSITION` token makes the entire response the position; a missing or
/// unparsable `CONFIDENCE` defaults to 75%. The returned confidence is a
/// fraction in `[0, 1]`.
pub(crate) fn parse_position_response(content: &str) -> (String, Vec<String>, f64) {
    #[derive(PartialEq)]
    enum Section {
        None,
        Position,
        Arguments,
    }

    let mut position_lines: Vec<String> = Vec::new();
    let mut arguments: Vec<String> = Vec::new();
    let mut confidence_pct: Option<f64> = None;
    let mut section = Section::None;

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(rest) = strip_token(trimmed, "POSITION:") {
            section = Section::Position;
            if !rest.is_empty() {
                position_lines.push(rest.to_string());
            }
        } else if strip_token(trimmed, "ARGUMENTS:").is_some() {
            section = Section::Arguments;
        } else if let Some(rest) = strip_token(trimmed, "CONFIDENCE:") {
            section = Section::None;
            confidence_pct = parse_confidence(rest);
        } else {
            match section {
                Section::Position => {
                    if !trimmed.is_empty() {
                        position_lines.push(trimmed.to_string());
                    }
                }
                Section::Arguments => {
                    let item = trimmed
                        .trim_start_matches(|c: char| {
                            c.is_ascii_digit()
                                || c == '.'
                                || c == '-'
                                || c == '*'
                                || c == '•'
                                || c == ' '
                        })
                        .trim();
                    if !item.is_empty() {
                        arguments.push(item.to_string());
                    }
                }
                Section::None => {}
            }
        }
    }

    let position = if position_lines.is_empty() {
        content.trim().to_string()
    } else {
        position_lines.join(" ")
    };

    let pct = confidence_pct.unwrap_or(DEFAULT_CONFIDENCE_PCT);
    (position, arguments, (pct / 100.0).clamp(0.0, 1.0))
}

/// Match `token` case-insensitively at line start and return the remainder.
fn strip_token<'a>(line: &'a str, token: &str) -> Option<&'a str> {
    match line.get(..token.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(token) => Some(line[token.len()..].trim()),
        _ => None,
    }
}

fn parse_confidence(rest: &str) -> Option<f64> {
    let cleaned = rest.trim().trim_end_matches('%').trim();
    let value: f64 = cleaned.parse().ok()?;
    // Values like "0.82" are already fractions; scale them up to percent.
    if value <= 1.0 {
        Some(value * 100.0)
    } else {
        Some(value)
    }
}

/// Deterministic round summary; no LLM call.
pub(crate) fn synthesize_round(round_number: usize, positions: &[AgentPosition]) -> String {
    let all_high = !positions.is_empty() && positions.iter().all(|p| p.confidence >= 0.75);
    let uncertain_count = positions.iter().filter(|p| p.confidence < 0.60).count();
    let header = if all_high {
        format!(
            "Round {}: all participants expressed high confidence.",
            round_number
        )
    } else if uncertain_count * 2 > positions.len() {
        format!("Round {}: positions remain uncertain.", round_number)
    } else {
        format!("Round {} summary:", round_number)
    };

    let mut synthesis = header;
    for position in positions {
        synthesis.push_str(&format!(
            "\n- {}: {} ({:.0}%)",
            position.agent_id,
            first_sentence_or(&position.position, 100),
            position.confidence * 100.0
        ));
    }
    synthesis
}

fn moderator_synthesis_prompt(topic: &str, rounds: &[DebateRound]) -> String {
    let mut prompt = format!(
        "The debate on \"{}\" has concluded. Full history:\n\n",
        topic
    );
    for round in rounds {
        prompt.push_str(&format!("Round {}:\n", round.round_number));
        for position in &round.positions {
            prompt.push_str(&format!(
                "- {} ({:.0}%): {}\n",
                position.agent_id,
                position.confidence * 100.0,
                position.position
            ));
        }
        prompt.push('\n');
    }
    prompt.push_str("Produce a final synthesis of the debate and state the consensus position.");
    prompt
}

fn average_confidence(positions: &[AgentPosition]) -> f64 {
    if positions.is_empty() {
        return 0.0;
    }
    positions.iter().map(|p| p.confidence).sum::<f64>() / positions.len() as f64
}

/// Take text up to the first sentence boundary, or the first `max_chars`
/// characters, whichever comes first.
pub(crate) fn first_sentence_or(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if let Some(dot) = text.find(". ") {
        let end = text[..dot + 1].chars().count();
        if end <= max_chars {
            return chars[..end].iter().collect();
        }
    }
    if chars.len() <= max_chars {
        text.to_string()
    } else {
        chars[..max_chars].iter().collect()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        text.to_string()
    } else {
        chars[..max_chars].iter().collect()
    }
}

/// Bound `text` to `hard` characters, preferring a `". "` sentence boundary
/// whose end falls in `[soft, hard)`; otherwise hard-cut at `hard` with an
/// ellipsis.
pub(crate) fn truncate_at_sentence(text: &str, soft: usize, hard: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= hard {
        return text.to_string();
    }
    // Scan for ". " boundaries whose sentence end lands inside [soft, hard).
    for end in (soft..hard).rev() {
        if end + 1 < chars.len() && chars[end] == '.' && chars[end + 1] == ' ' {
            return chars[..=end].iter().collect();
        }
    }
    let mut cut: String = chars[..hard].iter().collect();
    cut.push('…');
    cut
}

fn compute_metrics(rounds: &[DebateRound]) -> CollaborationMetrics {
    let all_positions: Vec<&AgentPosition> =
        rounds.iter().flat_map(|r| r.positions.iter()).collect();
    let interaction_count = all_positions.len();
    if interaction_count == 0 {
        return CollaborationMetrics::default();
    }

    let confidences: Vec<f64> = all_positions.iter().map(|p| p.confidence).collect();
    let mean_confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;
    let avg_response_length = all_positions
        .iter()
        .map(|p| p.position.chars().count())
        .sum::<usize>() as f64
        / interaction_count as f64;

    // Diversity over the final round's positions; variance over every
    // confidence. With fewer than two samples neither is meaningful, so the
    // documented fallbacks apply.
    let final_positions = rounds.last().map(|r| &r.positions[..]).unwrap_or(&[]);
    let perspective_diversity = if final_positions.len() >= 2 {
        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..final_positions.len() {
            for j in (i + 1)..final_positions.len() {
                total += 1.0
                    - jaccard_similarity(
                        &final_positions[i].position,
                        &final_positions[j].position,
                    );
                pairs += 1;
            }
        }
        total / pairs as f64
    } else {
        0.7
    };
    let confidence_variance = if confidences.len() >= 2 {
        confidences
            .iter()
            .map(|c| (c - mean_confidence).powi(2))
            .sum::<f64>()
            / confidences.len() as f64
    } else {
        0.2
    };

    CollaborationMetrics {
        perspective_diversity,
        agreement_level: mean_confidence,
        avg_response_length,
        interaction_count,
        confidence_variance,
        time_to_consensus_ms: 0,
    }
}

/// Jaccard similarity between two texts over normalized word sets. Words of
/// three or more characters only; both inputs lowercased.
pub(crate) fn jaccard_similarity(text1: &str, text2: &str) -> f64 {
    use std::collections::HashSet;

    let tokenize = |text: &str| -> HashSet<String> {
        text.to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| !w.is_empty())
            .collect()
    };

    let words1 = tokenize(text1);
    let words2 = tokenize(text2);

    if words1.is_empty() && words2.is_empty() {
        return 1.0;
    }
    if words1.is_empty() || words2.is_empty() {
        return 0.0;
    }

    let intersection = words1.intersection(&words2).count();
    let union = words1.union(&words2).count();
    intersection as f64 / union as f64
}

fn last_positions(agent_ids: &[String], rounds: &[DebateRound]) -> Vec<AgentResult> {
    agent_ids
        .iter()
        .filter_map(|id| {
            rounds
                .iter()
                .rev()
                .flat_map(|r| r.positions.iter())
                .find(|p| &p.agent_id == id)
                .map(|p| AgentResult {
                    agent_id: id.clone(),
                    output: p.position.clone(),
                    model: p.model.clone(),
                    provider: p.provider.clone(),
                })
        })
        .collect()
}
