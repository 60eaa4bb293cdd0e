//! Native-ReAct 策略
//!
//! 不生成显式计划：每轮迭代直接向 LLM 请求一个 Thought/Action，执行后把观察
//! 写回历史，受全局步数上限约束；到达上限时以部分性 final_answer 收束。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::StrategyParams;
use crate::core::EngineError;
use crate::strategy::action::{parse_reply, Action, ParsedReply};
use crate::strategy::runtime::{ExecutionResult, RunState, SessionStatus, StrategyRuntime};
use crate::strategy::{EventType, PlanningStrategy};

const SYSTEM_PROMPT: &str = "You are a task execution agent. Each turn, reply with ONE JSON \
action: {\"action\": \"tool_call\", \"tool\": ..., \"tool_input\": {...}} to use a tool, \
{\"action\": \"respond\", \"summary\": ...} when the mission is done, \
{\"action\": \"ask_user\", \"question\": ..., \"answer_key\": ...} when you need human input, or \
{\"action\": \"replan\", \"reason\": ...} to rethink. You may wrap it as a thought object with \
step_ref / rationale / expected_outcome / confidence.";

/// Native-ReAct：每轮一个 Thought/Action
pub struct NativeReact {
    params: StrategyParams,
}

impl NativeReact {
    pub fn new(params: &Value) -> Result<Self, EngineError> {
        Ok(Self {
            params: StrategyParams::from_value(params)?,
        })
    }
}

#[async_trait]
impl PlanningStrategy for NativeReact {
    fn name(&self) -> &str {
        "native_react"
    }

    async fn execute(
        &self,
        rt: &StrategyRuntime,
        mission: &str,
        session_id: &str,
    ) -> ExecutionResult {
        let mut run = RunState::new(SYSTEM_PROMPT, mission);
        // Native 模式复用 max_step_iterations 作为全局步数上限
        let max_steps = self.params.max_step_iterations;
        let mut last_content = String::new();

        for step in 0..max_steps {
            self.emit_step(rt, &mut run, step, max_steps);

            if rt.is_cancelled() {
                return rt
                    .fail(run, session_id, self.name(), EngineError::Cancelled, None)
                    .await;
            }

            let reply = match rt.call_llm(&mut run).await {
                Ok(r) => r,
                Err(e) => return rt.fail(run, session_id, self.name(), e, None).await,
            };

            if !reply.tool_calls.is_empty() {
                rt.dispatch_tools(&mut run, reply.tool_calls).await;
                continue;
            }

            let content = reply.content.unwrap_or_default();
            rt.emit_thinking(&mut run, &content);
            last_content = content.clone();

            match parse_reply(&content) {
                // 纯文本视为最终回答
                Ok(ParsedReply::Plain(text)) => {
                    return rt
                        .finish(run, session_id, self.name(), SessionStatus::Completed, text, None)
                        .await;
                }
                Ok(ParsedReply::Thought(thought)) => {
                    run.history
                        .push(crate::memory::ChatMessage::assistant(content));
                    match thought.action {
                        Action::Respond { summary } => {
                            return rt
                                .finish(
                                    run,
                                    session_id,
                                    self.name(),
                                    SessionStatus::Completed,
                                    summary,
                                    None,
                                )
                                .await;
                        }
                        Action::AskUser { question, answer_key } => {
                            return rt
                                .pause_for_user(
                                    run, session_id, self.name(), question, answer_key, None,
                                )
                                .await;
                        }
                        Action::Replan { reason } => {
                            run.history.push(crate::memory::ChatMessage::user(format!(
                                "Rethink your approach. Reason: {}",
                                reason
                            )));
                        }
                        Action::ToolCall { tool, tool_input } => {
                            let call = rt.single_call(&tool, tool_input);
                            rt.dispatch_tools(&mut run, vec![call]).await;
                        }
                    }
                }
                // 动作载荷非法：把错误回灌给 LLM 重试，不中止会话
                Err(e) => {
                    run.history.push(crate::memory::ChatMessage::user(format!(
                        "Your last reply was not a valid action: {}. Reply again with one \
                         valid JSON action.",
                        e
                    )));
                }
            }
        }

        // 步数上限：部分性收束，绝不向上抛
        let message = format!(
            "Reached the step ceiling ({}) before finishing. Last output:\n{}",
            max_steps, last_content
        );
        rt.finish(run, session_id, self.name(), SessionStatus::Completed, message, None)
            .await
    }
}

impl NativeReact {
    fn emit_step(&self, rt: &StrategyRuntime, run: &mut RunState, step: usize, max: usize) {
        rt.emit(
            run,
            EventType::StepStart,
            json!({"step": step, "max_steps": max}),
        );
    }
}
