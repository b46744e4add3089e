use async_trait::async_trait;
use quorum::quorum::pattern::{CollaborationResult, ForkJoinPattern, PipelinePattern};
use quorum::quorum::relay::RelayOrchestrator;
use quorum::quorum::trace::NoopTracer;
use quorum::{Agent, AgentProvider, ChatResponse, Context, Usage, WorkflowError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct MockAgent {
    id: String,
    reply: String,
    fail: bool,
    sessions: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockAgent {
    fn new(id: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            reply: reply.to_string(),
            fail: false,
            sessions: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            reply: String::new(),
            fail: true,
            sessions: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn chat(
        &self,
        _ctx: &Context,
        session_id: &str,
        prompt: &str,
    ) -> Result<ChatResponse, WorkflowError> {
        self.sessions.lock().unwrap().push(session_id.to_string());
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail {
            return Err(WorkflowError::AgentCallFailed {
                agent_id: self.id.clone(),
                message: "mock failure".to_string(),
            });
        }
        Ok(ChatResponse {
            content: self.reply.clone(),
            thinking: None,
            tool_executions: vec![],
            usage: Usage {
                input_tokens: 5,
                output_tokens: 10,
                cost_usd: 0.01,
            },
            model: "mock-model".to_string(),
            provider: "mock".to_string(),
        })
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn llm_model(&self) -> &str {
        "mock-model"
    }

    fn llm_provider_name(&self) -> &str {
        "mock"
    }
}

struct MockProvider {
    agents: HashMap<String, Arc<MockAgent>>,
}

impl MockProvider {
    fn new(agents: Vec<Arc<MockAgent>>) -> Arc<Self> {
        Arc::new(Self {
            agents: agents.into_iter().map(|a| (a.id.clone(), a)).collect(),
        })
    }
}

#[async_trait]
impl AgentProvider for MockProvider {
    async fn get_agent(
        &self,
        _ctx: &Context,
        id: &str,
    ) -> Result<Arc<dyn Agent>, WorkflowError> {
        self.agents
            .get(id)
            .cloned()
            .map(|a| a as Arc<dyn Agent>)
            .ok_or_else(|| WorkflowError::AgentNotFound(id.to_string()))
    }
}

fn orchestrator(provider: Arc<MockProvider>) -> RelayOrchestrator {
    RelayOrchestrator::new(provider, Arc::new(NoopTracer))
}

#[tokio::test]
async fn test_pipeline_chains_stage_outputs() {
    let a = MockAgent::new("a", "research notes");
    let b = MockAgent::new("b", "draft from notes");
    let c = MockAgent::new("c", "final document");
    let provider = MockProvider::new(vec![a.clone(), b.clone(), c.clone()]);

    let pattern = PipelinePattern {
        task: "write the report".to_string(),
        agent_ids: vec!["a".to_string(), "b".to_string(), "c".to_string()],
    };
    let result = orchestrator(provider)
        .execute_pipeline(&Context::new(), "wf-1", &pattern)
        .await
        .unwrap();

    assert_eq!(result.merged_output, "final document");
    let stages = match &result.collaboration {
        CollaborationResult::Pipeline(p) => &p.stages,
        _ => panic!("expected pipeline result"),
    };
    assert_eq!(stages.len(), 3);
    assert_eq!(stages[1].content, "draft from notes");

    // Stage 1 gets the bare task; later stages see the previous output and
    // the original task.
    assert_eq!(a.prompts()[0], "write the report");
    assert!(b.prompts()[0].contains("research notes"));
    assert!(b.prompts()[0].contains("Original task: write the report"));
    assert!(c.prompts()[0].contains("draft from notes"));

    assert_eq!(b.sessions(), vec!["wf-1-round2-b-pipeline".to_string()]);
}

#[tokio::test]
async fn test_pipeline_single_stage() {
    let a = MockAgent::new("a", "only output");
    let provider = MockProvider::new(vec![a]);

    let pattern = PipelinePattern {
        task: "small task".to_string(),
        agent_ids: vec!["a".to_string()],
    };
    let result = orchestrator(provider)
        .execute_pipeline(&Context::new(), "wf", &pattern)
        .await
        .unwrap();
    assert_eq!(result.merged_output, "only output");
}

#[tokio::test]
async fn test_pipeline_rejects_empty_stage_list() {
    let provider = MockProvider::new(vec![]);
    let pattern = PipelinePattern {
        task: "t".to_string(),
        agent_ids: vec![],
    };
    let err = orchestrator(provider)
        .execute_pipeline(&Context::new(), "wf", &pattern)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)));
}

#[tokio::test]
async fn test_pipeline_stage_failure_is_fatal() {
    let a = MockAgent::new("a", "out");
    let b = MockAgent::failing("b");
    let c = MockAgent::new("c", "never reached");
    let provider = MockProvider::new(vec![a, b, c.clone()]);

    let pattern = PipelinePattern {
        task: "t".to_string(),
        agent_ids: vec!["a".to_string(), "b".to_string(), "c".to_string()],
    };
    let err = orchestrator(provider)
        .execute_pipeline(&Context::new(), "wf", &pattern)
        .await
        .unwrap_err();
    match err {
        WorkflowError::AgentCallFailed { agent_id, message } => {
            assert_eq!(agent_id, "b");
            assert!(message.contains("stage 2"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(c.sessions().is_empty());
}

#[tokio::test]
async fn test_fork_join_concatenates_without_merge_agent() {
    let a = MockAgent::new("a", "alpha view");
    let b = MockAgent::new("b", "beta view");
    let provider = MockProvider::new(vec![a, b]);

    let pattern = ForkJoinPattern {
        task: "analyze".to_string(),
        agent_ids: vec!["a".to_string(), "b".to_string()],
        merge_agent_id: None,
    };
    let result = orchestrator(provider)
        .execute_fork_join(&Context::new(), "wf", &pattern)
        .await
        .unwrap();

    assert_eq!(result.merged_output, "[a] alpha view\n\n[b] beta view");
    let fork_join = match &result.collaboration {
        CollaborationResult::ForkJoin(f) => f,
        _ => panic!("expected fork-join result"),
    };
    assert_eq!(fork_join.branches.len(), 2);
    assert!(fork_join.merge_agent_id.is_none());
}

#[tokio::test]
async fn test_fork_join_merge_agent_produces_join() {
    let a = MockAgent::new("a", "alpha view");
    let b = MockAgent::new("b", "beta view");
    let merger = MockAgent::new("m", "combined view");
    let provider = MockProvider::new(vec![a, b, merger.clone()]);

    let pattern = ForkJoinPattern {
        task: "analyze".to_string(),
        agent_ids: vec!["a".to_string(), "b".to_string()],
        merge_agent_id: Some("m".to_string()),
    };
    let result = orchestrator(provider)
        .execute_fork_join(&Context::new(), "wf-2", &pattern)
        .await
        .unwrap();

    assert_eq!(result.merged_output, "combined view");
    let merge_prompt = &merger.prompts()[0];
    assert!(merge_prompt.contains("alpha view"));
    assert!(merge_prompt.contains("beta view"));
    assert_eq!(merger.sessions(), vec!["wf-2-round2-m-merge".to_string()]);
}

#[tokio::test]
async fn test_fork_join_requires_two_branches() {
    let a = MockAgent::new("a", "out");
    let provider = MockProvider::new(vec![a]);

    let pattern = ForkJoinPattern {
        task: "t".to_string(),
        agent_ids: vec!["a".to_string()],
        merge_agent_id: None,
    };
    let err = orchestrator(provider)
        .execute_fork_join(&Context::new(), "wf", &pattern)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)));
}

#[tokio::test]
async fn test_fork_join_branch_failure_is_fatal() {
    let a = MockAgent::new("a", "out");
    let b = MockAgent::failing("b");
    let provider = MockProvider::new(vec![a, b]);

    let pattern = ForkJoinPattern {
        task: "t".to_string(),
        agent_ids: vec!["a".to_string(), "b".to_string()],
        merge_agent_id: None,
    };
    let err = orchestrator(provider)
        .execute_fork_join(&Context::new(), "wf", &pattern)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::AgentCallFailed { .. }));
}

#[tokio::test]
async fn test_cancelled_context_aborts_pipeline() {
    let a = MockAgent::new("a", "out");
    let b = MockAgent::new("b", "out");
    let provider = MockProvider::new(vec![a.clone(), b]);

    let ctx = Context::new();
    ctx.cancel();
    let pattern = PipelinePattern {
        task: "t".to_string(),
        agent_ids: vec!["a".to_string(), "b".to_string()],
    };
    let err = orchestrator(provider)
        .execute_pipeline(&ctx, "wf", &pattern)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Cancelled));
    assert!(a.sessions().is_empty());
}
