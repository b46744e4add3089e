//! Spawn policies for ephemeral agents.
//!
//! An [`EphemeralAgentPolicy`] says when an on-demand agent (e.g. a
//! tie-breaking judge) *may* be created, and bounds how many times and at
//! what cumulative cost. The [`PolicyEvaluator`] tracks per-role spawn
//! counters and accumulated spend, and is explicitly [`reset`] at the start
//! of every workflow execution so counters never leak across workflows.
//!
//! Cap checks run before the trigger: a role at its spawn or cost cap is
//! blocked no matter what the trigger says. Both comparisons are `>=`, so a
//! spawn that crosses the cost limit is accepted and the *next* spawn is the
//! one that gets blocked.
//!
//! [`reset`]: PolicyEvaluator::reset

use crate::quorum::expression::{evaluate, EvaluationContext};
use std::collections::HashMap;
use std::sync::RwLock;

/// Condition under which an ephemeral agent may be spawned (still subject to
/// the policy's spawn and cost caps).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum SpawnTrigger {
    /// Spawn whenever asked.
    Always,
    /// Spawn when the orchestrator did not reach consensus.
    ConsensusNotReached,
    /// Spawn when average confidence is known and below the threshold.
    ConfidenceBelow(f64),
    /// Spawn when the top choices tied.
    TieDetected,
    /// Spawn when an agent explicitly requested escalation.
    EscalationRequested,
    /// Spawn when the boolean expression evaluates to `true` against the
    /// evaluation context. Parse/type errors and empty expressions evaluate
    /// to `false` and are logged.
    Custom(String),
}

/// Policy bounding ephemeral-agent creation for one role.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EphemeralAgentPolicy {
    /// Role the spawned agents fill (e.g. `"judge"`).
    pub role: String,
    /// When spawning is warranted.
    pub trigger: SpawnTrigger,
    /// Maximum spawns per workflow; `0` means unbounded.
    pub max_spawns: usize,
    /// Cumulative dollar cap per workflow; `0.0` means unbounded.
    pub cost_limit_usd: f64,
}

impl EphemeralAgentPolicy {
    /// The default judge policy used when a swarm has no pre-registered
    /// judge: spawn at most one judge per workflow, on missed consensus,
    /// with a $0.50 budget.
    pub fn default_judge() -> Self {
        Self {
            role: "judge".to_string(),
            trigger: SpawnTrigger::ConsensusNotReached,
            max_spawns: 1,
            cost_limit_usd: 0.50,
        }
    }
}

/// Outcome of a [`PolicyEvaluator::should_spawn`] check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnDecision {
    /// The spawn may proceed.
    Allowed,
    /// The spawn is blocked; the reason is reported in analysis output,
    /// never raised as an error.
    Blocked(String),
}

impl SpawnDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SpawnDecision::Allowed)
    }
}

/// Per-role spawn accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpawnStats {
    /// Number of spawns recorded for the role.
    pub count: usize,
    /// Cumulative dollar cost recorded for the role.
    pub cost_usd: f64,
}

/// Thread-safe tracker of per-role spawn counts and accumulated cost.
///
/// All operations take a single lock with short critical sections; readers
/// use the read guard. Callers never hold the lock across an agent call.
///
/// # Examples
///
/// ```
/// use quorum::quorum::expression::EvaluationContext;
/// use quorum::{EphemeralAgentPolicy, PolicyEvaluator};
///
/// let evaluator = PolicyEvaluator::new();
/// let policy = EphemeralAgentPolicy::default_judge();
/// let eval_ctx = EvaluationContext::default(); // consensus not reached
///
/// assert!(evaluator.should_spawn(&policy, &eval_ctx).is_allowed());
/// evaluator.record_spawn("judge", 0.12);
/// assert_eq!(evaluator.spawn_stats("judge").count, 1);
///
/// // max_spawns = 1, so the second judge is blocked.
/// assert!(!evaluator.should_spawn(&policy, &eval_ctx).is_allowed());
/// ```
#[derive(Debug, Default)]
pub struct PolicyEvaluator {
    stats: RwLock<HashMap<String, SpawnStats>>,
}

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether an ephemeral agent may be spawned under `policy`.
    ///
    /// Caps are checked first (spawn count, then cost), both with `>=`;
    /// only then is the trigger evaluated against `eval_ctx`.
    pub fn should_spawn(
        &self,
        policy: &EphemeralAgentPolicy,
        eval_ctx: &EvaluationContext,
    ) -> SpawnDecision {
        let current = self.spawn_stats(&policy.role);

        if policy.max_spawns > 0 && current.count >= policy.max_spawns {
            return SpawnDecision::Blocked(format!(
                "max spawns reached for role '{}' ({}/{})",
                policy.role, current.count, policy.max_spawns
            ));
        }
        if policy.cost_limit_usd > 0.0 && current.cost_usd >= policy.cost_limit_usd {
            return SpawnDecision::Blocked(format!(
                "cost limit reached for role '{}' (${:.2} of ${:.2})",
                policy.role, current.cost_usd, policy.cost_limit_usd
            ));
        }

        let triggered = match &policy.trigger {
            SpawnTrigger::Always => true,
            SpawnTrigger::ConsensusNotReached => !eval_ctx.consensus_reached,
            SpawnTrigger::ConfidenceBelow(threshold) => match eval_ctx.average_confidence {
                Some(conf) => conf < *threshold,
                None => false,
            },
            SpawnTrigger::TieDetected => eval_ctx.tie_detected,
            SpawnTrigger::EscalationRequested => eval_ctx.escalation_requested,
            SpawnTrigger::Custom(expr) => match evaluate(expr, eval_ctx) {
                Ok(result) => result,
                Err(e) => {
                    log::warn!(
                        "custom spawn trigger '{}' for role '{}' did not evaluate: {}",
                        expr,
                        policy.role,
                        e
                    );
                    false
                }
            },
        };

        if triggered {
            SpawnDecision::Allowed
        } else {
            SpawnDecision::Blocked(format!("trigger not met for role '{}'", policy.role))
        }
    }

    /// Atomically record one spawn and its cost for `role`.
    pub fn record_spawn(&self, role: &str, cost_usd: f64) {
        let mut stats = self.stats.write().unwrap();
        let entry = stats.entry(role.to_string()).or_default();
        entry.count += 1;
        entry.cost_usd += cost_usd;
    }

    /// Snapshot the accounting for `role`. Unknown roles read as zero.
    pub fn spawn_stats(&self, role: &str) -> SpawnStats {
        self.stats
            .read()
            .unwrap()
            .get(role)
            .copied()
            .unwrap_or_default()
    }

    /// Clear all per-role state. Called at the start of every workflow
    /// execution so spawn budgets are per-workflow.
    pub fn reset(&self) {
        self.stats.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quorum::expression::FieldValue;

    fn unreached_ctx() -> EvaluationContext {
        EvaluationContext {
            consensus_reached: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_reset_zeroes_all_roles() {
        let evaluator = PolicyEvaluator::new();
        evaluator.record_spawn("judge", 0.10);
        evaluator.record_spawn("critic", 0.25);
        evaluator.reset();
        assert_eq!(evaluator.spawn_stats("judge"), SpawnStats::default());
        assert_eq!(evaluator.spawn_stats("critic"), SpawnStats::default());
    }

    #[test]
    fn test_record_spawn_is_additive() {
        let evaluator = PolicyEvaluator::new();
        evaluator.record_spawn("judge", 0.20);
        evaluator.record_spawn("judge", 0.30);
        let stats = evaluator.spawn_stats("judge");
        assert_eq!(stats.count, 2);
        assert!((stats.cost_usd - 0.50).abs() < 1e-9);
    }

    #[test]
    fn test_max_spawns_blocks_regardless_of_trigger() {
        let evaluator = PolicyEvaluator::new();
        let policy = EphemeralAgentPolicy {
            role: "judge".to_string(),
            trigger: SpawnTrigger::Always,
            max_spawns: 1,
            cost_limit_usd: 0.0,
        };
        assert!(evaluator.should_spawn(&policy, &unreached_ctx()).is_allowed());
        evaluator.record_spawn("judge", 0.0);
        let decision = evaluator.should_spawn(&policy, &unreached_ctx());
        match decision {
            SpawnDecision::Blocked(reason) => assert!(reason.contains("max spawns")),
            SpawnDecision::Allowed => panic!("expected block"),
        }
    }

    #[test]
    fn test_cost_limit_exact_boundary_blocks_next_spawn() {
        let evaluator = PolicyEvaluator::new();
        let policy = EphemeralAgentPolicy {
            role: "judge".to_string(),
            trigger: SpawnTrigger::Always,
            max_spawns: 0,
            cost_limit_usd: 0.50,
        };
        evaluator.record_spawn("judge", 0.20);
        assert!(evaluator.should_spawn(&policy, &unreached_ctx()).is_allowed());
        // This spawn crosses the limit exactly; it was accepted, but the
        // next one must be blocked.
        evaluator.record_spawn("judge", 0.30);
        let decision = evaluator.should_spawn(&policy, &unreached_ctx());
        match decision {
            SpawnDecision::Blocked(reason) => assert!(reason.contains("cost limit")),
            SpawnDecision::Allowed => panic!("expected block"),
        }
    }

    #[test]
    fn test_builtin_triggers() {
        let evaluator = PolicyEvaluator::new();
        let mut policy = EphemeralAgentPolicy::default_judge();

        let mut ctx = unreached_ctx();
        assert!(evaluator.should_spawn(&policy, &ctx).is_allowed());
        ctx.consensus_reached = true;
        assert!(!evaluator.should_spawn(&policy, &ctx).is_allowed());

        policy.trigger = SpawnTrigger::ConfidenceBelow(0.6);
        ctx.average_confidence = Some(0.55);
        assert!(evaluator.should_spawn(&policy, &ctx).is_allowed());
        ctx.average_confidence = None;
        assert!(!evaluator.should_spawn(&policy, &ctx).is_allowed());

        policy.trigger = SpawnTrigger::TieDetected;
        ctx.tie_detected = true;
        assert!(evaluator.should_spawn(&policy, &ctx).is_allowed());

        policy.trigger = SpawnTrigger::EscalationRequested;
        assert!(!evaluator.should_spawn(&policy, &ctx).is_allowed());
        ctx.escalation_requested = true;
        assert!(evaluator.should_spawn(&policy, &ctx).is_allowed());
    }

    #[test]
    fn test_custom_trigger() {
        let evaluator = PolicyEvaluator::new();
        let policy = EphemeralAgentPolicy {
            role: "judge".to_string(),
            trigger: SpawnTrigger::Custom(
                "average_confidence < 0.5 && !consensus_reached".to_string(),
            ),
            max_spawns: 0,
            cost_limit_usd: 0.0,
        };

        let mut ctx = EvaluationContext {
            average_confidence: Some(0.45),
            ..Default::default()
        };
        assert!(evaluator.should_spawn(&policy, &ctx).is_allowed());
        ctx.consensus_reached = true;
        assert!(!evaluator.should_spawn(&policy, &ctx).is_allowed());
    }

    #[test]
    fn test_custom_trigger_errors_are_false() {
        let evaluator = PolicyEvaluator::new();
        let mut policy = EphemeralAgentPolicy {
            role: "judge".to_string(),
            trigger: SpawnTrigger::Custom("".to_string()),
            max_spawns: 0,
            cost_limit_usd: 0.0,
        };
        let ctx = unreached_ctx();
        assert!(!evaluator.should_spawn(&policy, &ctx).is_allowed());

        policy.trigger = SpawnTrigger::Custom("no_such_field > 1".to_string());
        assert!(!evaluator.should_spawn(&policy, &ctx).is_allowed());

        policy.trigger = SpawnTrigger::Custom("0.5".to_string());
        assert!(!evaluator.should_spawn(&policy, &ctx).is_allowed());
    }

    #[test]
    fn test_custom_fields_reach_triggers() {
        let evaluator = PolicyEvaluator::new();
        let policy = EphemeralAgentPolicy {
            role: "judge".to_string(),
            trigger: SpawnTrigger::Custom("deadline_pressure".to_string()),
            max_spawns: 0,
            cost_limit_usd: 0.0,
        };
        let mut ctx = unreached_ctx();
        ctx.custom_fields
            .insert("deadline_pressure".to_string(), FieldValue::Bool(true));
        assert!(evaluator.should_spawn(&policy, &ctx).is_allowed());
    }

    #[test]
    fn test_concurrent_record_and_read() {
        use std::sync::Arc;
        use std::thread;

        let evaluator = Arc::new(PolicyEvaluator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ev = Arc::clone(&evaluator);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    ev.record_spawn("judge", 0.01);
                    let stats = ev.spawn_stats("judge");
                    // Count and cost move together; a read mid-update would
                    // break this relation.
                    assert!((stats.cost_usd - stats.count as f64 * 0.01).abs() < 1e-6);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(evaluator.spawn_stats("judge").count, 800);
    }
}
