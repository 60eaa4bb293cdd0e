//! 计划驱动执行的公共骨架
//!
//! Plan-and-Execute / Plan-and-React / SPAR 共享：LLM 生成计划（封顶
//! max_plan_steps，依赖无环校验）、按序执行步骤、受限重规划（计数器耗尽即
//! 闭合失败）、可选的周期性反思。三个策略只在步内迭代模式与反思开关上不同。

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::StrategyParams;
use crate::core::EngineError;
use crate::memory::ChatMessage;
use crate::plan::{
    is_plan_complete, skip_remaining_pending, validate_dependencies, TodoItem, TodoList,
    TodoStatus,
};
use crate::strategy::action::{parse_reply, Action, ParsedReply};
use crate::strategy::runtime::{ExecutionResult, RunState, SessionStatus, StrategyRuntime};
use crate::strategy::EventType;

const EXEC_SYSTEM_PROMPT: &str = "You are a task execution agent working through a plan. \
Each turn, either request tool calls, or reply with ONE JSON action: \
{\"action\": \"respond\", \"summary\": ...} when the whole mission is done, \
{\"action\": \"ask_user\", \"question\": ..., \"answer_key\": ...} for human input, \
{\"action\": \"replan\", \"reason\": ...} when the plan no longer fits. \
A plain text reply is taken as the answer for the current step.";

/// 反思提示必须可与普通规划/执行提示区分（测试依赖此标记）
pub const REFLECTION_TAG: &str = "[reflection]";

/// 步内迭代模式
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// 每步最多 max_step_iterations 次 ReAct 子迭代
    MicroIterations,
    /// 每步单次 LLM 调用
    SingleCall,
}

/// 一步执行的出口
enum StepOutcome {
    /// 本步得到答案
    Done(String),
    /// LLM 宣告整个任务完成（respond 为任务级终态）
    MissionDone(String),
    /// 请求重规划
    ReplanRequested(String),
    /// 迭代耗尽
    Exhausted,
}

/// 计划驱动运行器
pub struct PlannedRun<'a> {
    pub rt: &'a StrategyRuntime,
    pub params: &'a StrategyParams,
    pub strategy_name: &'a str,
    pub mode: StepMode,
    /// Some(every) 时每完成 every 步做一次反思，总次数受 max_reflection_iterations
    pub reflect_every: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawPlanStep {
    description: String,
    #[serde(default)]
    acceptance_criteria: String,
    #[serde(default)]
    dependencies: Vec<usize>,
}

/// 从 LLM 文本中提取 JSON 数组并解析为计划步骤，封顶 max_steps
pub fn parse_plan(content: &str, mission: &str, max_steps: usize) -> Result<TodoList, EngineError> {
    let trimmed = content.trim();
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else {
        let start = trimmed
            .find('[')
            .ok_or_else(|| EngineError::Planning("plan reply carries no JSON array".into()))?;
        let end = trimmed
            .rfind(']')
            .ok_or_else(|| EngineError::Planning("plan reply carries no JSON array".into()))?;
        &trimmed[start..=end]
    };

    let raw: Vec<RawPlanStep> = serde_json::from_str(json_str)
        .map_err(|e| EngineError::Planning(format!("bad plan JSON: {}", e)))?;
    if raw.is_empty() {
        return Err(EngineError::Planning("plan is empty".into()));
    }

    let items: Vec<TodoItem> = raw
        .into_iter()
        .take(max_steps)
        .enumerate()
        .map(|(i, s)| {
            let mut item = TodoItem::new(i + 1, s.description);
            item.acceptance_criteria = s.acceptance_criteria;
            item.dependencies = s.dependencies.into_iter().collect();
            item
        })
        .collect();

    let plan = TodoList::new(mission, items);
    if !validate_dependencies(&plan) {
        return Err(EngineError::Planning(
            "plan dependencies are cyclic or reference unknown steps".into(),
        ));
    }
    Ok(plan)
}

impl PlannedRun<'_> {
    pub async fn run(&self, mission: &str, session_id: &str) -> ExecutionResult {
        let rt = self.rt;
        let name = self.strategy_name;
        let mut run = RunState::new(EXEC_SYSTEM_PROMPT, mission);

        // 计划生成
        run.history.push(ChatMessage::user(format!(
            "First, produce a plan as a JSON array (at most {} steps) of \
             {{\"description\": ..., \"acceptance_criteria\": ..., \"dependencies\": [positions]}}. \
             Reply with the array only.",
            self.params.max_plan_steps
        )));
        let reply = match rt.call_llm(&mut run).await {
            Ok(r) => r,
            Err(e) => return rt.fail(run, session_id, name, e, None).await,
        };
        let content = reply.content.unwrap_or_default();
        rt.emit_thinking(&mut run, &content);
        let mut plan = match parse_plan(&content, mission, self.params.max_plan_steps) {
            Ok(p) => p,
            Err(e) => return rt.fail(run, session_id, name, e, None).await,
        };
        run.history.push(ChatMessage::assistant(content));
        self.emit_plan(&mut run, &plan);

        let mut replans = 0usize;
        let mut reflections = 0usize;
        let mut completed_since_reflect = 0usize;
        let mut step_results: Vec<(usize, String)> = Vec::new();

        // 主循环：每次取依赖已满足的 PENDING 步骤（重规划会改写待执行尾部）
        while let Some(step) = next_step(&plan) {
            let pos = match step {
                NextStep::Run(pos) => pos,
                NextStep::Blocked(pos) => {
                    // 依赖已终态失败或被跳过，该步永远无法执行
                    if let Some(item) = plan.get_mut(pos) {
                        item.status = TodoStatus::Skipped;
                    }
                    self.emit_plan(&mut run, &plan);
                    continue;
                }
            };

            if let Some(item) = plan.get_mut(pos) {
                item.status = TodoStatus::InProgress;
                run.history.push(ChatMessage::user(format!(
                    "Current step {}: {}\nAcceptance criteria: {}",
                    pos, item.description, item.acceptance_criteria
                )));
            }

            let outcome = match self.run_step(&mut run, session_id, pos, &plan).await {
                Ok(o) => o,
                Err(Interrupt::Fail(e)) => {
                    return rt.fail(run, session_id, name, e, Some(&plan)).await
                }
                Err(Interrupt::Pause { question, answer_key }) => {
                    return rt
                        .pause_for_user(run, session_id, name, question, answer_key, Some(&plan))
                        .await;
                }
            };

            match outcome {
                StepOutcome::Done(answer) => {
                    if let Some(item) = plan.get_mut(pos) {
                        item.status = TodoStatus::Completed;
                    }
                    step_results.push((pos, answer));
                    self.emit_plan(&mut run, &plan);
                    completed_since_reflect += 1;

                    if let Some(every) = self.reflect_every {
                        if completed_since_reflect >= every
                            && reflections < self.params.max_reflection_iterations
                        {
                            completed_since_reflect = 0;
                            reflections += 1;
                            match self.reflect(&mut run).await {
                                Ok(Some(reason)) => {
                                    match self
                                        .replan(&mut run, &mut plan, &reason, &mut replans)
                                        .await
                                    {
                                        Ok(()) => {}
                                        Err(ReplanStop::Exhausted) => {
                                            return self
                                                .fail_closed(run, session_id, plan, step_results)
                                                .await;
                                        }
                                        Err(ReplanStop::Error(e)) => {
                                            return rt
                                                .fail(run, session_id, name, e, Some(&plan))
                                                .await;
                                        }
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    return rt.fail(run, session_id, name, e, Some(&plan)).await
                                }
                            }
                        }
                    }
                }
                StepOutcome::MissionDone(summary) => {
                    if let Some(item) = plan.get_mut(pos) {
                        item.status = TodoStatus::Completed;
                    }
                    // 提前完成：剩余 PENDING 全部置 SKIPPED 后再持久化
                    skip_remaining_pending(&mut plan);
                    self.emit_plan(&mut run, &plan);
                    return rt
                        .finish(run, session_id, name, SessionStatus::Completed, summary, Some(&plan))
                        .await;
                }
                StepOutcome::ReplanRequested(reason) => {
                    // 当前步由重规划出的新尾部接替
                    if let Some(item) = plan.get_mut(pos) {
                        item.status = TodoStatus::Skipped;
                    }
                    match self.replan(&mut run, &mut plan, &reason, &mut replans).await {
                        Ok(()) => {}
                        Err(ReplanStop::Exhausted) => {
                            return self.fail_closed(run, session_id, plan, step_results).await;
                        }
                        Err(ReplanStop::Error(e)) => {
                            return rt.fail(run, session_id, name, e, Some(&plan)).await;
                        }
                    }
                }
                StepOutcome::Exhausted => {
                    if let Some(item) = plan.get_mut(pos) {
                        item.status = TodoStatus::Failed;
                    }
                    self.emit_plan(&mut run, &plan);
                    let reason = format!("step {} exhausted its iteration budget", pos);
                    match self.replan(&mut run, &mut plan, &reason, &mut replans).await {
                        Ok(()) => {}
                        Err(ReplanStop::Exhausted) => {
                            return self.fail_closed(run, session_id, plan, step_results).await;
                        }
                        Err(ReplanStop::Error(e)) => {
                            return rt.fail(run, session_id, name, e, Some(&plan)).await;
                        }
                    }
                }
            }
        }

        // 所有步骤终态
        let failed = plan.items.iter().any(|i| i.status == TodoStatus::Failed);
        let status = if !failed && is_plan_complete(&plan) {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        let message = render_summary(&plan, &step_results);
        rt.finish(run, session_id, name, status, message, Some(&plan))
            .await
    }

    /// 执行单个步骤；返回步骤出口，或者需要整体中断（失败/暂停）
    async fn run_step(
        &self,
        run: &mut RunState,
        _session_id: &str,
        pos: usize,
        _plan: &TodoList,
    ) -> Result<StepOutcome, Interrupt> {
        let rt = self.rt;
        let iter_limit = match self.mode {
            StepMode::SingleCall => 1,
            StepMode::MicroIterations => self.params.max_step_iterations,
        };

        for iteration in 0..iter_limit {
            rt.emit(
                run,
                EventType::StepStart,
                json!({"step": pos, "iteration": iteration}),
            );
            if rt.is_cancelled() {
                return Err(Interrupt::Fail(EngineError::Cancelled));
            }

            let reply = rt.call_llm(run).await.map_err(Interrupt::Fail)?;

            if !reply.tool_calls.is_empty() {
                let results = rt.dispatch_tools(run, reply.tool_calls).await;
                if self.mode == StepMode::SingleCall {
                    // 单调用模式：工具结果即本步答案
                    let answer = results
                        .iter()
                        .map(|(_, r)| r.to_history_content())
                        .collect::<Vec<_>>()
                        .join("\n");
                    return Ok(StepOutcome::Done(answer));
                }
                continue;
            }

            let content = reply.content.unwrap_or_default();
            rt.emit_thinking(run, &content);

            match parse_reply(&content) {
                Ok(ParsedReply::Plain(text)) => {
                    run.history.push(ChatMessage::assistant(text.clone()));
                    return Ok(StepOutcome::Done(text));
                }
                Ok(ParsedReply::Thought(thought)) => {
                    run.history.push(ChatMessage::assistant(content));
                    match thought.action {
                        Action::Respond { summary } => {
                            return Ok(StepOutcome::MissionDone(summary))
                        }
                        Action::AskUser { question, answer_key } => {
                            return Err(Interrupt::Pause { question, answer_key });
                        }
                        Action::Replan { reason } => {
                            return Ok(StepOutcome::ReplanRequested(reason))
                        }
                        Action::ToolCall { tool, tool_input } => {
                            let call = rt.single_call(&tool, tool_input);
                            let results = rt.dispatch_tools(run, vec![call]).await;
                            if self.mode == StepMode::SingleCall {
                                let answer = results
                                    .iter()
                                    .map(|(_, r)| r.to_history_content())
                                    .collect::<Vec<_>>()
                                    .join("\n");
                                return Ok(StepOutcome::Done(answer));
                            }
                        }
                    }
                }
                Err(e) => {
                    run.history.push(ChatMessage::user(format!(
                        "Your last reply was not a valid action: {}. Reply again.",
                        e
                    )));
                }
            }
        }
        Ok(StepOutcome::Exhausted)
    }

    /// 反思调用：返回 Some(reason) 表示需要重规划
    async fn reflect(&self, run: &mut RunState) -> Result<Option<String>, EngineError> {
        run.history.push(ChatMessage::user(format!(
            "{} Review the steps completed so far and their observations. If the current \
             plan still fits, reply OK. Otherwise reply with \
             {{\"action\": \"replan\", \"reason\": ...}}.",
            REFLECTION_TAG
        )));
        let reply = self.rt.call_llm(run).await?;
        let content = reply.content.unwrap_or_default();
        self.rt.emit_thinking(run, &content);
        run.history.push(ChatMessage::assistant(content.clone()));

        match parse_reply(&content) {
            Ok(ParsedReply::Thought(t)) => match t.action {
                Action::Replan { reason } => Ok(Some(reason)),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// 受限重规划：移除 PENDING 尾部，请求 LLM 生成剩余步骤并续接编号
    async fn replan(
        &self,
        run: &mut RunState,
        plan: &mut TodoList,
        reason: &str,
        replans: &mut usize,
    ) -> Result<(), ReplanStop> {
        *replans += 1;
        if *replans > self.params.max_replans {
            return Err(ReplanStop::Exhausted);
        }

        run.history.push(ChatMessage::user(format!(
            "Replan: {}. Produce a new JSON array of steps for the remaining work \
             (at most {} steps), same shape as before. Reply with the array only.",
            reason, self.params.max_plan_steps
        )));
        let reply = self
            .rt
            .call_llm(run)
            .await
            .map_err(ReplanStop::Error)?;
        let content = reply.content.unwrap_or_default();
        self.rt.emit_thinking(run, &content);
        let fresh = parse_plan(&content, &plan.mission, self.params.max_plan_steps)
            .map_err(ReplanStop::Error)?;
        run.history.push(ChatMessage::assistant(content));

        // 保留历史（终态）步骤，替换待执行尾部；新步骤续接编号，依赖按偏移重映射
        plan.items.retain(|i| i.status != TodoStatus::Pending);
        let offset = plan.items.iter().map(|i| i.position).max().unwrap_or(0);
        for mut item in fresh.items {
            item.position += offset;
            item.dependencies = item.dependencies.iter().map(|d| d + offset).collect();
            plan.items.push(item);
        }
        if !validate_dependencies(plan) {
            return Err(ReplanStop::Error(EngineError::Planning(
                "replanned dependencies are cyclic or reference unknown steps".into(),
            )));
        }
        self.emit_plan(run, plan);
        Ok(())
    }

    /// 重规划额度耗尽：闭合失败，以部分性 final_answer 收束
    async fn fail_closed(
        &self,
        mut run: RunState,
        session_id: &str,
        mut plan: TodoList,
        step_results: Vec<(usize, String)>,
    ) -> ExecutionResult {
        for item in &mut plan.items {
            if matches!(item.status, TodoStatus::Pending | TodoStatus::InProgress) {
                item.status = TodoStatus::Failed;
            }
        }
        self.emit_plan(&mut run, &plan);
        let message = format!(
            "Replan budget exhausted ({} allowed). Partial progress:\n{}",
            self.params.max_replans,
            render_summary(&plan, &step_results)
        );
        self.rt
            .finish(
                run,
                session_id,
                self.strategy_name,
                SessionStatus::Failed,
                message,
                Some(&plan),
            )
            .await
    }

    fn emit_plan(&self, run: &mut RunState, plan: &TodoList) {
        let items: Vec<Value> = plan
            .items
            .iter()
            .map(|i| json!({"position": i.position, "status": i.status, "description": i.description}))
            .collect();
        self.rt.emit(
            run,
            EventType::PlanUpdated,
            json!({"todolist_id": plan.id, "items": items}),
        );
    }
}

/// 步骤执行中的整体中断
enum Interrupt {
    Fail(EngineError),
    Pause { question: String, answer_key: String },
}

enum ReplanStop {
    Exhausted,
    Error(EngineError),
}

/// 步骤选取结果
enum NextStep {
    /// 依赖全部 COMPLETED，可以执行
    Run(usize),
    /// 某个依赖已终态失败或被跳过，永远无法满足
    Blocked(usize),
}

/// 按计划顺序取下一个依赖已满足的 PENDING 步骤。前向依赖（依赖编号大于
/// 自身）的步骤被推迟到其依赖完成之后，而不是跳过；只有依赖已终态失败或
/// 被跳过的步骤才报告为 Blocked
fn next_step(plan: &TodoList) -> Option<NextStep> {
    for item in plan.items.iter().filter(|i| i.status == TodoStatus::Pending) {
        if plan.dependencies_met(item.position) {
            return Some(NextStep::Run(item.position));
        }
    }
    plan.items
        .iter()
        .filter(|i| i.status == TodoStatus::Pending)
        .find(|item| {
            item.dependencies.iter().any(|dep| {
                plan.items.iter().any(|i| {
                    i.position == *dep
                        && matches!(i.status, TodoStatus::Failed | TodoStatus::Skipped)
                })
            })
        })
        .map(|i| NextStep::Blocked(i.position))
}

fn render_summary(plan: &TodoList, step_results: &[(usize, String)]) -> String {
    let done = plan
        .items
        .iter()
        .filter(|i| i.status == TodoStatus::Completed)
        .count();
    let mut out = format!("Completed {}/{} steps.", done, plan.items.len());
    for (pos, result) in step_results {
        let preview: String = result.chars().take(120).collect();
        out.push_str(&format!("\n- step {}: {}", pos, preview));
    }
    out
}
