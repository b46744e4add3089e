//! Staged progress: events, history folding, and message rendering.
//!
//! While a pattern executes, orchestrators emit [`ProgressEvent`]s through a
//! [`ProgressSink`]. Each event names the execution [`Stage`] the turn is in
//! (generating, executing a tool, waiting for approval, …) plus whatever
//! partial output exists at that moment. The transport is an opaque sink —
//! this module only guarantees that events for one turn are emitted in
//! order by a single producer.
//!
//! On the consuming side, [`StageHistory`] folds the ordered event stream
//! into an append-only list of completed [`StageInfo`]s plus a mirror of the
//! in-progress stage, and [`progress_to_message_with_history`] renders a
//! displayable [`ProgressMessage`] from any `(event, history)` pair. The
//! render function is pure: calling it twice with the same inputs produces
//! equal messages, which makes the progressive view resumable — a client
//! that reconnects mid-turn replays the history and gets the same message.
//!
//! # Example
//!
//! ```
//! use quorum::quorum::progress::{
//!     progress_to_message_with_history, ProgressEvent, Stage, StageHistory,
//! };
//!
//! let mut history = StageHistory::new();
//! history.observe(&ProgressEvent::stage(Stage::LLMGeneration, "drafting"));
//! let event = ProgressEvent::stage(Stage::ToolExecution, "running query")
//!     .with_tool_name("execute_sql");
//! history.observe(&event);
//!
//! let msg = progress_to_message_with_history(&event, history.entries(), "msg-1");
//! assert!(msg.thinking.iter().any(|line| line.contains("Executing tool")));
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution stage of an agent turn. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// No stage reported yet.
    Unspecified,
    /// The engine is choosing a collaboration pattern.
    PatternSelection,
    /// Discovering schemas/capabilities before generation.
    SchemaDiscovery,
    /// The LLM is generating output.
    LLMGeneration,
    /// A tool is executing.
    ToolExecution,
    /// Waiting on a human-in-the-loop reply.
    HumanInTheLoop,
    /// Running guardrail checks on produced output.
    GuardrailCheck,
    /// The agent is correcting its own failed output.
    SelfCorrection,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
}

impl Stage {
    /// Human-readable label. Hidden stages render as the empty string.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::PatternSelection => "",
            Stage::SchemaDiscovery => "Discovering schema",
            Stage::LLMGeneration => "Generating response",
            Stage::ToolExecution => "Executing tool",
            Stage::HumanInTheLoop => "Waiting for approval",
            Stage::GuardrailCheck => "Checking guardrails",
            Stage::SelfCorrection => "Self-correcting",
            Stage::Failed => "Failed",
            Stage::Unspecified | Stage::Completed => "",
        }
    }
}

/// A human-in-the-loop request carried by a progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlRequest {
    /// Correlation id the client echoes back with the reply.
    pub request_id: String,
    /// What the human is being asked.
    pub prompt: String,
}

/// One staged update emitted during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The stage the turn is in.
    pub stage: Stage,
    /// Short status message for the stage.
    pub message: String,
    /// Tool being executed, for [`Stage::ToolExecution`] events.
    pub tool_name: Option<String>,
    /// Partial LLM output accumulated so far.
    pub partial_content: Option<String>,
    /// Partial structured result, when the turn produces data rather than
    /// prose.
    pub partial_result: Option<serde_json::Value>,
    /// Percentage complete, when the producer can estimate it.
    pub progress_pct: Option<u8>,
    /// Dollar cost accumulated so far.
    pub cost: Option<f64>,
    /// Human-in-the-loop request, for [`Stage::HumanInTheLoop`] events.
    pub hitl_request: Option<HitlRequest>,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Create an event for `stage` with a status message.
    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            tool_name: None,
            partial_content: None,
            partial_result: None,
            progress_pct: None,
            cost: None,
            hitl_request: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_partial_content(mut self, content: impl Into<String>) -> Self {
        self.partial_content = Some(content.into());
        self
    }

    pub fn with_progress_pct(mut self, pct: u8) -> Self {
        self.progress_pct = Some(pct);
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost = Some(cost_usd);
        self
    }
}

/// One completed (or in-progress) stage in a turn's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    pub stage: Stage,
    pub message: String,
    pub tool_name: Option<String>,
    pub content: Option<String>,
    /// Whether the stage ended badly (the turn moved to `Failed` or
    /// `SelfCorrection` right after it).
    pub failed: bool,
    /// Whether the stage has completed.
    pub done: bool,
}

/// Append-only stage history for a single turn.
///
/// Feed it every [`ProgressEvent`] in arrival order. When the stage changes,
/// the previous stage is sealed into the history; the newest event is
/// mirrored as the current in-progress stage.
#[derive(Debug, Clone, Default)]
pub struct StageHistory {
    entries: Vec<StageInfo>,
    current: Option<StageInfo>,
}

impl StageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the history.
    pub fn observe(&mut self, event: &ProgressEvent) {
        if let Some(prev) = &self.current {
            if prev.stage != event.stage && prev.stage != Stage::Unspecified {
                let mut sealed = prev.clone();
                sealed.failed = matches!(event.stage, Stage::Failed | Stage::SelfCorrection);
                sealed.done = true;
                self.entries.push(sealed);
            }
        }
        self.current = Some(StageInfo {
            stage: event.stage,
            message: event.message.clone(),
            tool_name: event.tool_name.clone(),
            content: event.partial_content.clone(),
            failed: event.stage == Stage::Failed,
            done: false,
        });
    }

    /// Completed stages, oldest first.
    pub fn entries(&self) -> &[StageInfo] {
        &self.entries
    }

    /// The in-progress stage, when one has been observed.
    pub fn current(&self) -> Option<&StageInfo> {
        self.current.as_ref()
    }
}

/// Terminal finish marker on a rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Finish {
    /// The turn completed normally.
    EndTurn,
    /// The turn failed; carries the failure message.
    Error(String),
}

/// A displayable view of a running turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    /// Stable id; all renders of one turn share it.
    pub message_id: String,
    /// Ordered thinking lines: one per completed stage, then the current
    /// stage.
    pub thinking: Vec<String>,
    /// Message body: the partial content, else the partial result JSON,
    /// else empty.
    pub content: String,
    /// Set on terminal events only.
    pub finish: Option<Finish>,
}

/// Render a displayable message from the latest event and the stage history.
///
/// Pure: equal inputs produce equal messages. No spinner glyph is injected —
/// in-progress animation is a presentation concern of the client.
pub fn progress_to_message_with_history(
    progress: &ProgressEvent,
    history: &[StageInfo],
    message_id: &str,
) -> ProgressMessage {
    let mut thinking = Vec::new();

    for entry in history {
        match entry.stage {
            // Generation output lands in the message body, not the history.
            Stage::LLMGeneration => continue,
            Stage::ToolExecution if entry.tool_name.is_some() => {
                let mark = if entry.failed { "✗" } else { "✓" };
                thinking.push(format!(
                    "⏺ Tool: {} {}",
                    entry.tool_name.as_deref().unwrap_or_default(),
                    mark
                ));
            }
            _ => {
                let label = entry.stage.label();
                if label.is_empty() {
                    continue;
                }
                if entry.failed {
                    thinking.push(format!("✗ {}", label));
                } else {
                    thinking.push(label.to_string());
                }
            }
        }
    }

    if let Some(line) = current_line(progress) {
        thinking.push(line);
    }

    let content = if let Some(partial) = &progress.partial_content {
        partial.clone()
    } else if let Some(result) = &progress.partial_result {
        result.to_string()
    } else {
        String::new()
    };

    let finish = match progress.stage {
        Stage::Completed => Some(Finish::EndTurn),
        Stage::Failed => Some(Finish::Error(progress.message.clone())),
        _ => None,
    };

    ProgressMessage {
        message_id: message_id.to_string(),
        thinking,
        content,
        finish,
    }
}

/// Build the single line describing the in-progress stage, or `None` when
/// there is nothing to show (hidden stage and no message).
fn current_line(progress: &ProgressEvent) -> Option<String> {
    let mut line = String::new();
    let label = progress.stage.label();
    if !label.is_empty() {
        line.push_str(label);
    }
    if let Some(tool) = &progress.tool_name {
        if line.is_empty() {
            line.push_str(tool);
        } else {
            line.push_str(&format!(": {}", tool));
        }
    }
    if !progress.message.is_empty() {
        if line.is_empty() {
            line.push_str(&progress.message);
        } else {
            line.push_str(&format!(" — {}", progress.message));
        }
    }
    if let Some(pct) = progress.progress_pct {
        if !line.is_empty() {
            line.push_str(&format!(" {}%", pct));
        }
    }
    if line.is_empty() {
        return None;
    }
    if progress.stage == Stage::Failed && !line.starts_with('✗') {
        line = format!("✗ {}", line);
    }
    Some(line)
}

/// Outbound sink for progress events. Single producer per turn; events
/// arrive in emission order.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Receive one event. Implementations must not block the orchestrator
    /// for long — buffer and forward.
    async fn emit(&self, event: ProgressEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressSink;

#[async_trait]
impl ProgressSink for NoopProgressSink {
    async fn emit(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_fold_seals_previous_stage() {
        let mut history = StageHistory::new();
        history.observe(&ProgressEvent::stage(Stage::SchemaDiscovery, "scanning"));
        history.observe(&ProgressEvent::stage(Stage::LLMGeneration, "drafting"));

        assert_eq!(history.entries().len(), 1);
        let sealed = &history.entries()[0];
        assert_eq!(sealed.stage, Stage::SchemaDiscovery);
        assert!(sealed.done);
        assert!(!sealed.failed);
        assert_eq!(history.current().unwrap().stage, Stage::LLMGeneration);
    }

    #[test]
    fn test_history_fold_marks_failure_transitions() {
        let mut history = StageHistory::new();
        history.observe(&ProgressEvent::stage(Stage::ToolExecution, "running"));
        history.observe(&ProgressEvent::stage(Stage::SelfCorrection, "retrying"));
        assert!(history.entries()[0].failed);

        let mut history = StageHistory::new();
        history.observe(&ProgressEvent::stage(Stage::GuardrailCheck, "checking"));
        history.observe(&ProgressEvent::stage(Stage::Failed, "guardrail tripped"));
        assert!(history.entries()[0].failed);
    }

    #[test]
    fn test_unspecified_never_enters_history() {
        let mut history = StageHistory::new();
        history.observe(&ProgressEvent::stage(Stage::Unspecified, ""));
        history.observe(&ProgressEvent::stage(Stage::LLMGeneration, "drafting"));
        assert!(history.entries().is_empty());
    }

    #[test]
    fn test_same_stage_does_not_append() {
        let mut history = StageHistory::new();
        history.observe(&ProgressEvent::stage(Stage::LLMGeneration, "token 1"));
        history.observe(&ProgressEvent::stage(Stage::LLMGeneration, "token 2"));
        assert!(history.entries().is_empty());
        assert_eq!(history.current().unwrap().message, "token 2");
    }

    #[test]
    fn test_render_tool_history_and_current_generation() {
        // Stages: LLMGeneration done, ToolExecution(execute_sql) done ok,
        // LLMGeneration in progress.
        let mut history = StageHistory::new();
        history.observe(&ProgressEvent::stage(Stage::LLMGeneration, "drafting"));
        history.observe(
            &ProgressEvent::stage(Stage::ToolExecution, "querying").with_tool_name("execute_sql"),
        );
        let current = ProgressEvent::stage(Stage::LLMGeneration, "summarizing");
        history.observe(&current);

        let msg = progress_to_message_with_history(&current, history.entries(), "msg-1");
        // LLMGeneration is suppressed from history; the tool line shows the
        // success mark.
        assert_eq!(msg.thinking.len(), 2);
        assert_eq!(msg.thinking[0], "⏺ Tool: execute_sql ✓");
        assert!(msg.thinking[1].contains("Generating response"));
        assert!(!msg.thinking.iter().any(|l| l.contains('◌')));
        assert!(msg.finish.is_none());
    }

    #[test]
    fn test_render_failed_tool() {
        let mut history = StageHistory::new();
        history.observe(
            &ProgressEvent::stage(Stage::ToolExecution, "querying").with_tool_name("execute_sql"),
        );
        let current = ProgressEvent::stage(Stage::SelfCorrection, "fixing query");
        history.observe(&current);

        let msg = progress_to_message_with_history(&current, history.entries(), "msg-1");
        assert_eq!(msg.thinking[0], "⏺ Tool: execute_sql ✗");
        assert!(msg.thinking[1].contains("Self-correcting"));
    }

    #[test]
    fn test_render_body_prefers_partial_content() {
        let event = ProgressEvent::stage(Stage::LLMGeneration, "")
            .with_partial_content("The answer so far");
        let msg = progress_to_message_with_history(&event, &[], "msg-1");
        assert_eq!(msg.content, "The answer so far");

        let mut event = ProgressEvent::stage(Stage::LLMGeneration, "");
        event.partial_result = Some(serde_json::json!({"rows": 3}));
        let msg = progress_to_message_with_history(&event, &[], "msg-1");
        assert_eq!(msg.content, r#"{"rows":3}"#);
    }

    #[test]
    fn test_render_terminal_finishes() {
        let done = ProgressEvent::stage(Stage::Completed, "");
        let msg = progress_to_message_with_history(&done, &[], "msg-1");
        assert_eq!(msg.finish, Some(Finish::EndTurn));

        let failed = ProgressEvent::stage(Stage::Failed, "provider timeout");
        let msg = progress_to_message_with_history(&failed, &[], "msg-1");
        assert_eq!(msg.finish, Some(Finish::Error("provider timeout".to_string())));
        assert!(msg.thinking.last().unwrap().starts_with("✗ "));
    }

    #[test]
    fn test_render_progress_pct_and_purity() {
        let event = ProgressEvent::stage(Stage::LLMGeneration, "drafting").with_progress_pct(40);
        let history = [StageInfo {
            stage: Stage::SchemaDiscovery,
            message: "scanning".to_string(),
            tool_name: None,
            content: None,
            failed: false,
            done: true,
        }];
        let a = progress_to_message_with_history(&event, &history, "msg-1");
        let b = progress_to_message_with_history(&event, &history, "msg-1");
        assert_eq!(a, b);
        assert!(a.thinking.last().unwrap().contains("40%"));
        assert_eq!(a.thinking[0], "Discovering schema");
    }
}
