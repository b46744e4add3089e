//! Coordinator adapter: busy guarding, cancellation, and message fan-out.
//!
//! The coordinator sits between an RPC surface and the engine. For each
//! turn it:
//!
//! 1. refuses the run when the target agent already has a turn in flight
//!    ([`WorkflowError::AgentBusy`]);
//! 2. installs a cancellable child context for the turn;
//! 3. wraps the turn's [`ProgressEvent`] stream in a per-turn adapter that
//!    folds stage history and publishes rendered [`ProgressMessage`]s to a
//!    single output sink under a stable message id;
//! 4. clears the busy mark when the turn returns, success or not.
//!
//! Agents whose id ends in `-coordinator` (case-insensitive) additionally
//! get an independent background *session subscription* so async messages
//! produced by their sub-agents keep flowing after the originating run
//! returns. Subscriptions are created once per session and torn down at
//! [`Coordinator::shutdown`].
//!
//! Human-in-the-loop events start a watchdog: when no further event arrives
//! within the configured reply timeout, the turn's context is cancelled.
//!
//! All indices (busy set, cancel map, session→agent map, subscription map)
//! live behind one `RwLock`; reads take the read guard and the lock is
//! never held across an await.

use crate::quorum::agent::Context;
use crate::quorum::engine::EngineConfig;
use crate::quorum::error::WorkflowError;
use crate::quorum::progress::{
    progress_to_message_with_history, ProgressEvent, ProgressMessage, ProgressSink, Stage,
    StageHistory,
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Executes one agent turn, pushing staged progress into the provided sink.
#[async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run_turn(
        &self,
        ctx: &Context,
        agent_id: &str,
        session_id: &str,
        prompt: &str,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<(), WorkflowError>;
}

/// The single outbound message sink. One producer per turn; cross-turn
/// concurrency is safe because each turn owns its own message id.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn publish(&self, message: ProgressMessage);
}

/// Source of async progress events produced by sub-agents within a session.
#[async_trait]
pub trait SessionSubscriber: Send + Sync {
    async fn subscribe(
        &self,
        ctx: &Context,
        session_id: &str,
    ) -> Result<BoxStream<'static, ProgressEvent>, WorkflowError>;
}

#[derive(Default)]
struct CoordinatorState {
    busy: HashSet<String>,
    cancels: HashMap<String, Context>,
    session_agents: HashMap<String, String>,
    subscriptions: HashMap<String, Context>,
}

/// Per-agent turn coordination with cancellation and event fan-out.
pub struct Coordinator {
    runner: Arc<dyn TurnRunner>,
    output: Arc<dyn MessageSink>,
    subscriber: Option<Arc<dyn SessionSubscriber>>,
    default_agent_id: String,
    hitl_timeout: Duration,
    state: Arc<RwLock<CoordinatorState>>,
}

impl Coordinator {
    pub fn new(
        runner: Arc<dyn TurnRunner>,
        output: Arc<dyn MessageSink>,
        default_agent_id: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            output,
            subscriber: None,
            default_agent_id: default_agent_id.into(),
            hitl_timeout: Duration::from_secs(300),
            state: Arc::new(RwLock::new(CoordinatorState::default())),
        }
    }

    /// Enable session subscriptions for coordinator-suffixed agents
    /// (builder pattern).
    pub fn with_session_subscriber(mut self, subscriber: Arc<dyn SessionSubscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    /// Override the human-in-the-loop reply timeout (builder pattern).
    pub fn with_hitl_timeout(mut self, timeout: Duration) -> Self {
        self.hitl_timeout = timeout;
        self
    }

    /// Apply engine configuration (currently the HITL reply timeout).
    pub fn with_config(self, config: &EngineConfig) -> Self {
        self.with_hitl_timeout(config.hitl_timeout)
    }

    /// Run one turn for `agent_id` (the default agent when `None`).
    ///
    /// Fails fast with [`WorkflowError::AgentBusy`] when that agent already
    /// has a turn in flight. The busy mark is cleared when the turn
    /// returns, regardless of outcome.
    pub async fn run(
        &self,
        ctx: &Context,
        session_id: &str,
        prompt: &str,
        agent_id: Option<&str>,
    ) -> Result<(), WorkflowError> {
        let agent_id = agent_id.unwrap_or(&self.default_agent_id).to_string();

        let turn_ctx = {
            let mut state = self.state.write().unwrap();
            if state.busy.contains(&agent_id) {
                return Err(WorkflowError::AgentBusy(agent_id));
            }
            state.busy.insert(agent_id.clone());
            let turn_ctx = ctx.child();
            state.cancels.insert(agent_id.clone(), turn_ctx.clone());
            state
                .session_agents
                .insert(session_id.to_string(), agent_id.clone());
            turn_ctx
        };

        if agent_id.to_lowercase().ends_with("-coordinator") {
            self.ensure_subscription(session_id);
        }

        let sink = Arc::new(TurnAdapterSink {
            message_id: uuid::Uuid::new_v4().to_string(),
            history: Mutex::new(StageHistory::new()),
            output: Arc::clone(&self.output),
            turn_ctx: turn_ctx.clone(),
            hitl_timeout: self.hitl_timeout,
            seq: Arc::new(AtomicU64::new(0)),
        });

        let result = self
            .runner
            .run_turn(&turn_ctx, &agent_id, session_id, prompt, sink)
            .await;

        let mut state = self.state.write().unwrap();
        state.busy.remove(&agent_id);
        state.cancels.remove(&agent_id);
        drop(state);

        result
    }

    /// Whether `agent_id` has a turn in flight.
    pub fn is_busy(&self, agent_id: &str) -> bool {
        self.state.read().unwrap().busy.contains(agent_id)
    }

    /// Whether the agent last bound to `session_id` has a turn in flight.
    pub fn is_session_busy(&self, session_id: &str) -> bool {
        let state = self.state.read().unwrap();
        state
            .session_agents
            .get(session_id)
            .map(|agent_id| state.busy.contains(agent_id))
            .unwrap_or(false)
    }

    /// Cancel the default agent's in-flight turn. Idempotent.
    pub fn cancel(&self) {
        let ctx = self
            .state
            .read()
            .unwrap()
            .cancels
            .get(&self.default_agent_id)
            .cloned();
        if let Some(ctx) = ctx {
            ctx.cancel();
        }
    }

    /// Cancel every tracked agent's in-flight turn. Idempotent.
    pub fn cancel_all(&self) {
        let contexts: Vec<Context> = self
            .state
            .read()
            .unwrap()
            .cancels
            .values()
            .cloned()
            .collect();
        for ctx in contexts {
            ctx.cancel();
        }
    }

    /// Cancel all turns and tear down every session subscription.
    pub fn shutdown(&self) {
        self.cancel_all();
        let mut state = self.state.write().unwrap();
        for ctx in state.subscriptions.values() {
            ctx.cancel();
        }
        state.subscriptions.clear();
    }

    /// Open the per-session background subscription once. Subscriptions
    /// outlive the originating run and are torn down at shutdown.
    fn ensure_subscription(&self, session_id: &str) {
        let subscriber = match &self.subscriber {
            Some(subscriber) => Arc::clone(subscriber),
            None => return,
        };

        let sub_ctx = {
            let mut state = self.state.write().unwrap();
            if state.subscriptions.contains_key(session_id) {
                return;
            }
            let sub_ctx = Context::new();
            state
                .subscriptions
                .insert(session_id.to_string(), sub_ctx.clone());
            sub_ctx
        };

        let output = Arc::clone(&self.output);
        let state = Arc::clone(&self.state);
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let stream = match subscriber.subscribe(&sub_ctx, &session_id).await {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("session subscription for '{}' failed: {}", session_id, e);
                    state.write().unwrap().subscriptions.remove(&session_id);
                    return;
                }
            };

            let message_id = uuid::Uuid::new_v4().to_string();
            let mut history = StageHistory::new();
            let mut stream = stream;
            loop {
                tokio::select! {
                    _ = sub_ctx.cancelled() => break,
                    item = stream.next() => match item {
                        Some(event) => {
                            history.observe(&event);
                            let message = progress_to_message_with_history(
                                &event,
                                history.entries(),
                                &message_id,
                            );
                            output.publish(message).await;
                        }
                        None => break,
                    },
                }
            }
            log::debug!("session subscription for '{}' closed", session_id);
        });
    }
}

/// Per-turn sink: folds stage history, renders messages, and arms the
/// human-in-the-loop watchdog.
struct TurnAdapterSink {
    message_id: String,
    history: Mutex<StageHistory>,
    output: Arc<dyn MessageSink>,
    turn_ctx: Context,
    hitl_timeout: Duration,
    seq: Arc<AtomicU64>,
}

#[async_trait]
impl ProgressSink for TurnAdapterSink {
    async fn emit(&self, event: ProgressEvent) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let message = {
            let mut history = self.history.lock().unwrap();
            history.observe(&event);
            progress_to_message_with_history(&event, history.entries(), &self.message_id)
        };
        self.output.publish(message).await;

        // A pending approval must be answered within the reply timeout;
        // any newer event counts as progress and disarms the watchdog.
        if event.stage == Stage::HumanInTheLoop {
            let turn_ctx = self.turn_ctx.clone();
            let timeout = self.hitl_timeout;
            let counter = Arc::clone(&self.seq);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if counter.load(Ordering::SeqCst) == seq && !turn_ctx.is_cancelled() {
                    log::warn!("human-in-the-loop reply timed out, cancelling turn");
                    turn_ctx.cancel();
                }
            });
        }
    }
}
