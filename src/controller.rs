//! Loop controller: the orchestration core
//!
//! A per-turn state machine over {Analyzing, Executing, Synthesizing,
//! AwaitingToolCompletion, Done} with two topologies:
//!
//! PIPELINE (one operation per turn, no cycles):
//!   ANALYZING → EXECUTING → SYNTHESIZING → DONE
//!
//! CYCLIC (decide → act until the decision step stops asking for tools):
//!   ANALYZING ⇄ AWAITING_TOOL_COMPLETION → DONE
//!
//! The cyclic form is bounded by a hard round-trip cap; reaching the cap
//! forces completion with a best-effort answer from whatever results
//! were gathered. No error escapes a turn: the per-turn guard converts
//! anything unexpected into a failure answer.

use crate::config::AgentConfig;
use crate::executor::ToolExecutor;
use crate::llm::ChatClient;
use crate::models::{ConversationState, ToolCall, ToolResult, TurnRecord};
use crate::router::IntentRouter;
use crate::session::SessionStore;
use crate::synthesizer::ResponseSynthesizer;
use crate::tools::create_default_registry;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ROUND_TRIPS: u32 = 10;

/// States of the per-turn machine. Pipeline turns never enter
/// AwaitingToolCompletion; cyclic turns never enter Executing or
/// Synthesizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Analyzing,
    Executing,
    Synthesizing,
    AwaitingToolCompletion,
    Done,
}

/// One executed call inside a cyclic turn
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub call: ToolCall,
    pub result: ToolResult,
}

/// Decision emitted by the agent step of the cyclic topology
pub enum Decision {
    /// Zero pending calls; the turn is complete. Without an inline
    /// answer the controller synthesizes one from the gathered results.
    Finish(Option<String>),
    /// One or more calls to run before deciding again
    Act(Vec<ToolCall>),
}

#[async_trait]
pub trait AgentPolicy: Send + Sync {
    async fn decide(
        &self,
        query: &str,
        history: &ConversationState,
        gathered: &[StepOutcome],
    ) -> Result<Decision>;
}

/// Default decision step: resolve one call on the first round, finish
/// once a result has been gathered.
pub struct RouterPolicy {
    router: Arc<IntentRouter>,
}

impl RouterPolicy {
    pub fn new(router: Arc<IntentRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl AgentPolicy for RouterPolicy {
    async fn decide(
        &self,
        query: &str,
        history: &ConversationState,
        gathered: &[StepOutcome],
    ) -> Result<Decision> {
        if gathered.is_empty() {
            let call = self.router.route(query, history).await;
            Ok(Decision::Act(vec![call]))
        } else {
            Ok(Decision::Finish(None))
        }
    }
}

pub struct LoopController {
    router: Arc<IntentRouter>,
    executor: ToolExecutor,
    synthesizer: ResponseSynthesizer,
    sessions: Arc<SessionStore>,
    max_round_trips: u32,
}

impl LoopController {
    pub fn new(
        router: IntentRouter,
        executor: ToolExecutor,
        synthesizer: ResponseSynthesizer,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            router: Arc::new(router),
            executor,
            synthesizer,
            sessions,
            max_round_trips: DEFAULT_MAX_ROUND_TRIPS,
        }
    }

    /// Wire the standard components from configuration
    pub fn from_config(config: &AgentConfig, sessions: Arc<SessionStore>) -> Self {
        let chat = config
            .llm
            .as_ref()
            .map(|llm| Arc::new(ChatClient::new(llm, config.llm_timeout)));

        let registry = create_default_registry(config);

        Self::new(
            IntentRouter::new(chat.clone()),
            ToolExecutor::new(registry, config.tool_timeout),
            ResponseSynthesizer::new(chat),
            sessions,
        )
        .with_max_round_trips(config.max_round_trips)
    }

    pub fn with_max_round_trips(mut self, cap: u32) -> Self {
        self.max_round_trips = cap;
        self
    }

    /// Per-turn guard over the pipeline topology: the interactive loop
    /// always gets an answer, never an error.
    pub async fn handle_turn(&self, session_id: &str, query: &str) -> String {
        match self.run_turn(session_id, query).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(session_id, error = %e, "turn failed unexpectedly");
                format!("查询失败：{}", e)
            }
        }
    }

    /// Per-turn guard over the cyclic topology
    pub async fn handle_cyclic_turn(&self, session_id: &str, query: &str) -> String {
        let policy = RouterPolicy::new(self.router.clone());
        match self.run_cyclic_turn(session_id, query, &policy).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(session_id, error = %e, "cyclic turn failed unexpectedly");
                format!("查询失败：{}", e)
            }
        }
    }

    /// Pipeline topology: exactly one operation, strictly linear
    pub async fn run_turn(&self, session_id: &str, query: &str) -> Result<String> {
        let history = self.sessions.get_or_create(session_id).await?;
        info!(session_id, query, "turn started");

        debug!(state = ?LoopState::Analyzing, "resolving operation");
        let call = self.router.route(query, &history).await;

        debug!(state = ?LoopState::Executing, operation = %call.operation, "dispatching");
        let result = self.executor.execute(&call).await;

        debug!(state = ?LoopState::Synthesizing, success = result.is_success(), "rendering answer");
        let answer = self.synthesizer.synthesize(query, &result).await;

        self.sessions
            .append(
                session_id,
                TurnRecord::new(
                    query.to_string(),
                    Some(call.operation),
                    Some(result),
                    answer.clone(),
                ),
            )
            .await?;

        debug!(state = ?LoopState::Done, "turn complete");
        Ok(answer)
    }

    /// Cyclic topology: decide → act until the policy finishes or the
    /// round-trip cap forces completion.
    pub async fn run_cyclic_turn(
        &self,
        session_id: &str,
        query: &str,
        policy: &dyn AgentPolicy,
    ) -> Result<String> {
        let history = self.sessions.get_or_create(session_id).await?;
        info!(session_id, query, "cyclic turn started");

        let mut gathered: Vec<StepOutcome> = Vec::new();
        let mut round_trips = 0u32;

        let answer = loop {
            // Agent decision step
            debug!(state = ?LoopState::Analyzing, round_trips, "deciding");

            if round_trips >= self.max_round_trips {
                warn!(round_trips, "round-trip cap reached, forcing completion");
                break self.best_effort_answer(query, &gathered).await;
            }

            let calls = match policy.decide(query, &history, &gathered).await {
                Ok(Decision::Finish(Some(text))) => break text,
                Ok(Decision::Finish(None)) => {
                    break self.best_effort_answer(query, &gathered).await
                }
                Ok(Decision::Act(calls)) if calls.is_empty() => {
                    break self.best_effort_answer(query, &gathered).await
                }
                Ok(Decision::Act(calls)) => calls,
                Err(e) => {
                    warn!(error = %e, "decision step failed");
                    break self.best_effort_answer(query, &gathered).await;
                }
            };

            // Run every pending call, append the outcomes, decide again
            debug!(
                state = ?LoopState::AwaitingToolCompletion,
                pending = calls.len(),
                "executing pending calls"
            );
            for call in calls {
                let result = self.executor.execute(&call).await;
                gathered.push(StepOutcome { call, result });
            }
            round_trips += 1;
        };

        let last = gathered.last();
        self.sessions
            .append(
                session_id,
                TurnRecord::new(
                    query.to_string(),
                    last.map(|outcome| outcome.call.operation),
                    last.map(|outcome| outcome.result.clone()),
                    answer.clone(),
                ),
            )
            .await?;

        debug!(state = ?LoopState::Done, round_trips, "cyclic turn complete");
        Ok(answer)
    }

    /// Best effort: prefer the most recent successful result, fall back
    /// to the most recent result of any kind.
    async fn best_effort_answer(&self, query: &str, gathered: &[StepOutcome]) -> String {
        let outcome = gathered
            .iter()
            .rev()
            .find(|outcome| outcome.result.is_success())
            .or_else(|| gathered.last());

        match outcome {
            Some(outcome) => self.synthesizer.synthesize(query, &outcome.result).await,
            None => "查询失败：未能得到任何查询结果".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operation;
    use crate::tools::create_mock_registry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn controller() -> LoopController {
        LoopController::new(
            IntentRouter::new(None),
            ToolExecutor::new(create_mock_registry(), Duration::from_secs(5)),
            ResponseSynthesizer::new(None),
            Arc::new(SessionStore::new()),
        )
    }

    #[tokio::test]
    async fn test_pipeline_end_to_end() {
        let controller = controller();

        let answer = controller
            .handle_turn("default", "贵州茅台的基本信息")
            .await;

        // Keyword routing resolves {BasicInfo, 600519.SH}; the fixture
        // payload carries the company name into the fallback answer.
        assert!(answer.contains("贵州茅台"));
    }

    #[tokio::test]
    async fn test_pipeline_appends_turn_record() {
        let controller = controller();

        controller.handle_turn("s1", "贵州茅台的基本信息").await;
        controller.handle_turn("s1", "茅台的实时价格").await;

        let state = controller.sessions.get_or_create("s1").await.unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state.last().unwrap().operation, Some(Operation::RealtimePrice));

        let other = controller.sessions.get_or_create("s2").await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_cyclic_single_round() {
        let controller = controller();

        let answer = controller
            .handle_cyclic_turn("default", "贵州茅台的基本信息")
            .await;
        assert!(answer.contains("贵州茅台"));

        let state = controller
            .sessions
            .get_or_create("default")
            .await
            .unwrap();
        assert_eq!(state.len(), 1);
    }

    struct GreedyPolicy {
        rounds: AtomicUsize,
    }

    #[async_trait]
    impl AgentPolicy for GreedyPolicy {
        async fn decide(
            &self,
            _query: &str,
            _history: &ConversationState,
            _gathered: &[StepOutcome],
        ) -> crate::Result<Decision> {
            self.rounds.fetch_add(1, Ordering::SeqCst);
            let mut arguments = serde_json::Map::new();
            arguments.insert("stock_code".to_string(), json!("600519.SH"));
            Ok(Decision::Act(vec![ToolCall::new(
                Operation::BasicInfo,
                arguments,
            )]))
        }
    }

    #[tokio::test]
    async fn test_cyclic_cap_forces_termination() {
        let controller = controller().with_max_round_trips(3);
        let policy = GreedyPolicy {
            rounds: AtomicUsize::new(0),
        };

        let answer = controller
            .run_cyclic_turn("default", "不断追问", &policy)
            .await
            .unwrap();

        // Done is reached in at most cap cycles even though the policy
        // always requests another call; the best-effort answer comes
        // from the gathered results.
        assert_eq!(policy.rounds.load(Ordering::SeqCst), 3);
        assert!(answer.contains("贵州茅台"));
    }

    struct InlineFinishPolicy;

    #[async_trait]
    impl AgentPolicy for InlineFinishPolicy {
        async fn decide(
            &self,
            _query: &str,
            _history: &ConversationState,
            _gathered: &[StepOutcome],
        ) -> crate::Result<Decision> {
            Ok(Decision::Finish(Some("无需查询。".to_string())))
        }
    }

    #[tokio::test]
    async fn test_cyclic_inline_answer_skips_tools() {
        let controller = controller();

        let answer = controller
            .run_cyclic_turn("default", "你好", &InlineFinishPolicy)
            .await
            .unwrap();
        assert_eq!(answer, "无需查询。");
    }

    #[tokio::test]
    async fn test_cyclic_without_results_reports_failure() {
        let controller = controller().with_max_round_trips(0);
        let policy = GreedyPolicy {
            rounds: AtomicUsize::new(0),
        };

        let answer = controller
            .run_cyclic_turn("default", "问题", &policy)
            .await
            .unwrap();
        assert!(answer.starts_with("查询失败："));
    }
}
