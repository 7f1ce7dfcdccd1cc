//! `agent` node — a bounded plan/act/observe loop.
//!
//! The loop is an explicit state machine: each iteration plans one step via
//! the LLM, dispatches the planned tool(s), and appends their output to a
//! scratch buffer.  Budgets (wall clock, iterations, retries) are checked
//! at every transition, and every way out of the loop carries an explicit
//! [`TerminationReason`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::config::{AgentConfig, AgentTool, FormatRule, NodeConfig, NodeType};
use crate::error::NodeError;
use crate::formatter;
use crate::generative::render_prompt;
use crate::llm::{LlmError, LlmRequest};
use crate::traits::{NodeExecutor, Services};

/// Model used for planning and for the `llm_call` tool.
pub const PLANNER_MODEL: &str = "gpt-4o";

/// Backoff base for transient failures: 1 s, 2 s, 4 s.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// How much of the scratch the planner gets to see.
const SCRATCH_PREVIEW_CHARS: usize = 500;

/// Why the loop stopped.  Only `objective_met` is a success; every other
/// reason fails the step and is recorded in its `error_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    ObjectiveMet,
    IterationLimit,
    TimeBudgetExhausted,
    ToolError,
    PlannerError,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectiveMet => "objective_met",
            Self::IterationLimit => "iteration_limit",
            Self::TimeBudgetExhausted => "time_budget_exhausted",
            Self::ToolError => "tool_error",
            Self::PlannerError => "planner_error",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One action proposed by the planner.
#[derive(Debug, Clone, PartialEq)]
enum PlannedAction {
    Finish,
    LlmCall { prompt: String },
    Formatter { rules: Vec<FormatRule> },
}

/// Whether an LLM call served the planner or a dispatched tool; decides
/// which termination reason a failure is attributed to.
#[derive(Debug, Clone, Copy)]
enum LlmRole {
    Planner,
    Tool,
}

impl LlmRole {
    fn reason(self) -> TerminationReason {
        match self {
            Self::Planner => TerminationReason::PlannerError,
            Self::Tool => TerminationReason::ToolError,
        }
    }
}

pub struct AgentNode;

#[async_trait]
impl NodeExecutor for AgentNode {
    async fn execute(
        &self,
        config_snapshot: &serde_json::Value,
        input_text: &str,
        services: &Services,
    ) -> Result<String, NodeError> {
        let NodeConfig::Agent(config) = NodeConfig::parse(NodeType::Agent, config_snapshot)? else {
            unreachable!("parse returns the variant matching the node type");
        };
        AgentRun::new(&config, services).run(input_text).await
    }
}

struct AgentRun<'a> {
    config: &'a AgentConfig,
    services: &'a Services,
    deadline: Instant,
}

impl<'a> AgentRun<'a> {
    fn new(config: &'a AgentConfig, services: &'a Services) -> Self {
        let deadline =
            Instant::now() + Duration::from_secs_f64(config.budgets.execution_time);
        Self {
            config,
            services,
            deadline,
        }
    }

    async fn run(&self, input_text: &str) -> Result<String, NodeError> {
        let max_iterations = self.config.max_iterations();
        let mut scratch = input_text.to_string();

        for iteration in 1..=max_iterations {
            self.remaining_budget()
                .ok_or_else(|| self.budget_exhausted())?;

            let plan = self
                .call_llm(
                    LlmRequest::new(PLANNER_MODEL, self.planner_prompt(&scratch)),
                    LlmRole::Planner,
                )
                .await?;

            let actions = self.parse_actions(&plan)?;
            if actions.contains(&PlannedAction::Finish) {
                debug!(iteration, "planner reported {}", TerminationReason::ObjectiveMet);
                return Ok(scratch);
            }

            self.check_whitelist(&actions)?;

            for output in self.run_actions(&actions, &scratch).await? {
                observe(&mut scratch, &output);
            }
        }

        Err(NodeError::Budget(format!(
            "{}: agent stopped after {max_iterations} iterations without meeting the objective",
            TerminationReason::IterationLimit
        )))
    }

    /// Time left before the overall execution budget expires.
    fn remaining_budget(&self) -> Option<Duration> {
        self.deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
    }

    fn budget_exhausted(&self) -> NodeError {
        NodeError::Budget(format!(
            "{}: agent exceeded its {}s execution budget",
            TerminationReason::TimeBudgetExhausted,
            self.config.budgets.execution_time
        ))
    }

    fn planner_prompt(&self, scratch: &str) -> String {
        let tools: Vec<&str> = self.config.tools.iter().map(AgentTool::as_str).collect();
        format!(
            "Objective: {}\n\nCurrent text:\n{}\n\nAvailable tools: {}.\n\
             Reply with one action per line, each being exactly one of:\n\
             finish\nllm_call: <prompt>\nformatter: <comma-separated rules>\n\
             Reply with finish once the objective is met.",
            self.config.objective,
            truncate_chars(scratch, SCRATCH_PREVIEW_CHARS),
            tools.join(", "),
        )
    }

    fn parse_actions(&self, plan: &str) -> Result<Vec<PlannedAction>, NodeError> {
        let mut actions = Vec::new();

        for line in plan.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (head, rest) = match line.split_once(':') {
                Some((head, rest)) => (head.trim().to_lowercase(), rest.trim()),
                None => (line.to_lowercase(), ""),
            };

            match head.as_str() {
                "finish" | "complete" => actions.push(PlannedAction::Finish),
                "llm_call" => actions.push(PlannedAction::LlmCall {
                    prompt: rest.to_string(),
                }),
                "formatter" => {
                    let rules = if rest.is_empty() {
                        self.config
                            .formatting_rules
                            .clone()
                            .unwrap_or_else(|| vec![FormatRule::Lowercase])
                    } else {
                        rest.split(',')
                            .map(|r| r.trim().parse::<FormatRule>())
                            .collect::<Result<Vec<_>, _>>()
                            .map_err(|e| self.planner_error(&e))?
                    };
                    actions.push(PlannedAction::Formatter { rules });
                }
                _ => return Err(self.planner_error(&format!("unrecognized action '{line}'"))),
            }
        }

        if actions.is_empty() {
            return Err(self.planner_error("planner returned no action"));
        }
        Ok(actions)
    }

    fn planner_error(&self, detail: &str) -> NodeError {
        NodeError::Internal(format!("{}: {detail}", TerminationReason::PlannerError))
    }

    fn check_whitelist(&self, actions: &[PlannedAction]) -> Result<(), NodeError> {
        for action in actions {
            let needed = match action {
                PlannedAction::LlmCall { .. } => AgentTool::LlmCall,
                PlannedAction::Formatter { .. } => AgentTool::Formatter,
                PlannedAction::Finish => continue,
            };
            if !self.config.tools.contains(&needed) {
                return Err(NodeError::Validation(format!(
                    "{}: tool '{}' is not in the agent's whitelist",
                    TerminationReason::ToolError,
                    needed.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Dispatch the planned actions.  A single action runs inline; a batch
    /// runs concurrently, capped at `max_concurrent`, with outputs kept in
    /// plan order.
    async fn run_actions(
        &self,
        actions: &[PlannedAction],
        scratch: &str,
    ) -> Result<Vec<String>, NodeError> {
        let cap = self.config.max_concurrent().max(1);
        let futures: Vec<_> = actions
            .iter()
            .map(|a| run_tool_boxed(self, a, scratch))
            .collect();
        let mut pending = stream::iter(futures).buffered(cap);

        let mut outputs = Vec::with_capacity(actions.len());
        while let Some(result) = pending.next().await {
            outputs.push(result?);
        }
        Ok(outputs)
    }

    async fn run_tool(&self, action: &PlannedAction, scratch: &str) -> Result<String, NodeError> {
        match action {
            // Finish never reaches dispatch; run() returns first.
            PlannedAction::Finish => Ok(scratch.to_string()),
            PlannedAction::LlmCall { prompt } => {
                let prompt = if prompt.is_empty() {
                    format!(
                        "Objective: {}\n\nProcess this text:\n{scratch}",
                        self.config.objective
                    )
                } else {
                    render_prompt(prompt, scratch)
                };
                self.call_llm(LlmRequest::new(PLANNER_MODEL, prompt), LlmRole::Tool)
                    .await
            }
            PlannedAction::Formatter { rules } => Ok(formatter::apply_rules(scratch, rules)),
        }
    }

    /// One LLM call under the per-call timeout, retrying transient failures
    /// with exponential backoff up to `max_retries`.
    async fn call_llm(&self, request: LlmRequest, role: LlmRole) -> Result<String, NodeError> {
        let max_retries = self.config.max_retries();
        let mut attempt = 0u32;

        loop {
            let remaining = self
                .remaining_budget()
                .ok_or_else(|| self.budget_exhausted())?;
            let per_call = remaining.min(Duration::from_secs_f64(self.config.timeout_seconds()));

            let result = match tokio::time::timeout(per_call, self.services.llm.complete(&request))
                .await
            {
                Ok(inner) => inner,
                Err(_) => Err(LlmError::Timeout),
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(
                        attempt,
                        "transient LLM failure, retrying in {delay:?}: {e}"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let reason = role.reason();
                    let message = format!("{reason}: {e}");
                    return Err(if e.is_transient() {
                        NodeError::Upstream(message)
                    } else {
                        NodeError::Internal(message)
                    });
                }
            }
        }
    }
}

/// Boxes a [`AgentRun::run_tool`] call so it has a concrete future type;
/// needed because `stream::iter(...).buffered(..)` requires the mapping
/// closure's return type to not depend on the per-item borrow in a way
/// that trips the borrow checker's HRTB inference for async fns.
fn run_tool_boxed<'a>(
    run: &'a AgentRun<'a>,
    action: &'a PlannedAction,
    scratch: &'a str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, NodeError>> + Send + 'a>> {
    Box::pin(run.run_tool(action, scratch))
}

/// Observe step: append a tool's output to the scratch.
fn observe(scratch: &mut String, output: &str) {
    if scratch.is_empty() {
        scratch.push_str(output);
    } else {
        scratch.push_str("\n\n");
        scratch.push_str(output);
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{mock_services_with_llm, MockLlm};
    use serde_json::json;
    use std::sync::Arc;

    fn agent_config(extra: serde_json::Value) -> serde_json::Value {
        let mut cfg = json!({
            "objective": "tidy the text",
            "tools": ["llm_call", "formatter"],
            "budgets": { "execution_time": 30 }
        });
        if let (Some(base), Some(more)) = (cfg.as_object_mut(), extra.as_object()) {
            for (k, v) in more {
                base.insert(k.clone(), v.clone());
            }
        }
        cfg
    }

    #[tokio::test]
    async fn finish_returns_the_scratch_unchanged() {
        let llm = Arc::new(MockLlm::returning("finish"));
        let services = mock_services_with_llm(llm.clone());

        let out = AgentNode
            .execute(&agent_config(json!({})), "seed text", &services)
            .await
            .unwrap();
        assert_eq!(out, "seed text");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn iteration_limit_fails_the_step() {
        // Planner never emits finish: plan + act per iteration, two iterations.
        let llm = Arc::new(MockLlm::returning("llm_call: keep going"));
        let services = mock_services_with_llm(llm.clone());

        let cfg = agent_config(json!({ "max_iterations": 2 }));
        let err = AgentNode.execute(&cfg, "seed", &services).await.unwrap_err();

        assert!(matches!(err, NodeError::Budget(ref msg) if msg.contains("iteration_limit")));
        assert_eq!(llm.call_count(), 4); // 2 planner calls + 2 tool calls
    }

    #[tokio::test]
    async fn tool_outside_whitelist_fails_the_agent() {
        let llm = Arc::new(MockLlm::returning("formatter: lowercase"));
        let services = mock_services_with_llm(llm);

        let cfg = json!({
            "objective": "tidy",
            "tools": ["llm_call"],
            "budgets": { "execution_time": 30 }
        });
        let err = AgentNode.execute(&cfg, "seed", &services).await.unwrap_err();
        assert!(matches!(err, NodeError::Validation(ref msg) if msg.contains("tool_error")));
    }

    #[tokio::test]
    async fn unparseable_plan_is_a_planner_error() {
        let llm = Arc::new(MockLlm::returning("deploy the kraken"));
        let services = mock_services_with_llm(llm);

        let err = AgentNode
            .execute(&agent_config(json!({})), "seed", &services)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Internal(ref msg) if msg.contains("planner_error")));
    }

    #[tokio::test]
    async fn formatter_tool_output_is_appended_to_the_scratch() {
        let llm = Arc::new(MockLlm::scripted([
            Ok("formatter: uppercase".to_string()),
            Ok("finish".to_string()),
        ]));
        let services = mock_services_with_llm(llm);

        let out = AgentNode
            .execute(&agent_config(json!({})), "hi", &services)
            .await
            .unwrap();
        assert_eq!(out, "hi\n\nHI");
    }

    #[tokio::test]
    async fn batched_actions_keep_plan_order() {
        let llm = Arc::new(MockLlm::scripted([
            Ok("llm_call: first\nllm_call: second".to_string()),
            Ok("alpha".to_string()),
            Ok("beta".to_string()),
            Ok("finish".to_string()),
        ]));
        let services = mock_services_with_llm(llm.clone());

        let cfg = agent_config(json!({ "max_concurrent": 2 }));
        let out = AgentNode.execute(&cfg, "", &services).await.unwrap();
        assert_eq!(out, "alpha\n\nbeta");
        assert_eq!(llm.call_count(), 4);
    }

    #[tokio::test]
    async fn transient_planner_failure_is_retried_with_backoff() {
        let llm = Arc::new(MockLlm::scripted([
            Err(LlmError::RateLimited),
            Ok("finish".to_string()),
        ]));
        let services = mock_services_with_llm(llm.clone());

        let started = Instant::now();
        let out = AgentNode
            .execute(&agent_config(json!({})), "seed", &services)
            .await
            .unwrap();
        assert_eq!(out, "seed");
        assert_eq!(llm.call_count(), 2);
        // One backoff interval of 1 s.
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn non_transient_planner_failure_aborts_immediately() {
        let llm = Arc::new(MockLlm::scripted([Err(LlmError::Auth)]));
        let services = mock_services_with_llm(llm.clone());

        let err = AgentNode
            .execute(&agent_config(json!({})), "seed", &services)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Internal(ref msg) if msg.contains("planner_error")));
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn slow_llm_exhausts_the_time_budget() {
        // Each call times out against the clamped remaining budget; the
        // retry backoff then burns through the 50 ms budget entirely.
        let llm = Arc::new(
            MockLlm::returning("llm_call: slow").with_delay(Duration::from_millis(200)),
        );
        let services = mock_services_with_llm(llm);

        let cfg = agent_config(json!({ "budgets": { "execution_time": 0.05 } }));
        let err = AgentNode.execute(&cfg, "seed", &services).await.unwrap_err();
        assert!(
            matches!(err, NodeError::Budget(ref msg) if msg.contains("time_budget_exhausted"))
        );
    }
}
