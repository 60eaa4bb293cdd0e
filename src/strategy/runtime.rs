//! 策略运行时
//!
//! 各规划策略共享的协作方集合与循环原语：带压缩闸门的 LLM 调用、经编排器的
//! 工具批次派发（结果按请求顺序写回历史）、事件发布、会话持久化与 ask_user
//! 暂停。一个会话是单一顺序逻辑流；唯一的挂起点是 LLM 调用与工具 execute。

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::{CheckpointManager, CheckpointStore, RequiredInputs};
use crate::core::EngineError;
use crate::llm::{LlmClient, LlmReply};
use crate::memory::{
    deterministic_compression, summarize_stale_block, ChatMessage, ContextBudget,
    ContextPackBuilder, PackItem, PackSource,
};
use crate::plan::TodoList;
use crate::session::SessionStore;
use crate::strategy::action::Observation;
use crate::strategy::{EventType, StreamEvent};
use crate::tools::{ToolCallRequest, ToolOrchestrator, ToolResult};

/// 事件与工具预览的展示截断
const PREVIEW_CHARS: usize = 200;

/// 会话终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Completed,
    Failed,
    Pending,
    Paused,
}

/// 一次会话运行的终结摘要
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionResult {
    pub session_id: String,
    pub status: SessionStatus,
    pub final_message: String,
    pub execution_history: Vec<StreamEvent>,
    pub todolist_id: Option<String>,
    pub pending_question: Option<String>,
}

/// 单次运行的可变状态：对话历史、事件日志、工具预览
pub struct RunState {
    pub history: Vec<ChatMessage>,
    pub events: Vec<StreamEvent>,
    /// (工具名, 结果预览)，供上下文包取最近 N 条
    pub tool_previews: Vec<PackItem>,
}

impl RunState {
    pub fn new(system_prompt: &str, mission: &str) -> Self {
        Self {
            history: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(mission),
            ],
            events: Vec::new(),
            tool_previews: Vec::new(),
        }
    }
}

/// 策略运行时：组合根构造一次，注入各策略
pub struct StrategyRuntime {
    llm: Arc<dyn LlmClient>,
    orchestrator: Arc<ToolOrchestrator>,
    sessions: Arc<dyn SessionStore>,
    checkpoints: CheckpointManager<Arc<dyn CheckpointStore>>,
    budget: ContextBudget,
    keep_recent_exchanges: usize,
    /// 确定性裁剪后仍超过此值时做 LLM 摘要第二遍；None 关闭
    summarize_over_tokens: Option<usize>,
    pack_builder: Option<ContextPackBuilder>,
    model: String,
    event_tx: Option<UnboundedSender<StreamEvent>>,
    cancel_token: CancellationToken,
}

impl StrategyRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        orchestrator: Arc<ToolOrchestrator>,
        sessions: Arc<dyn SessionStore>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            orchestrator,
            sessions,
            checkpoints: CheckpointManager::new(checkpoint_store),
            budget: ContextBudget::default(),
            keep_recent_exchanges: 4,
            summarize_over_tokens: None,
            pack_builder: None,
            model: model.into(),
            event_tx: None,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_budget(mut self, budget: ContextBudget, keep_recent_exchanges: usize) -> Self {
        self.budget = budget;
        self.keep_recent_exchanges = keep_recent_exchanges.max(1);
        self
    }

    pub fn with_summarization(mut self, over_tokens: usize) -> Self {
        self.summarize_over_tokens = Some(over_tokens);
        self
    }

    pub fn with_pack_builder(mut self, builder: ContextPackBuilder) -> Self {
        self.pack_builder = Some(builder);
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<StreamEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn checkpoints(&self) -> &CheckpointManager<Arc<dyn CheckpointStore>> {
        &self.checkpoints
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// 记录并推送一条事件
    pub fn emit(&self, run: &mut RunState, event_type: EventType, data: Value) {
        let event = StreamEvent::new(event_type, data);
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event.clone());
        }
        run.events.push(event);
    }

    /// 调 LLM 前先过预算闸门：确定性压缩必跑在前，LLM 摘要是可选第二遍；
    /// 随后注入上下文包（若配置），再下发工具 schema 调用 LLM
    pub async fn call_llm(&self, run: &mut RunState) -> Result<LlmReply, EngineError> {
        if self.budget.needs_compaction(&run.history) {
            run.history =
                deterministic_compression(&run.history, &self.budget, self.keep_recent_exchanges);
            if let Some(threshold) = self.summarize_over_tokens {
                run.history = summarize_stale_block(
                    self.llm.as_ref(),
                    &self.model,
                    std::mem::take(&mut run.history),
                    &self.budget,
                    self.keep_recent_exchanges,
                    threshold,
                )
                .await?;
            }
        }

        let mut messages = run.history.clone();
        if let Some(builder) = &self.pack_builder {
            if let Some(pack) = builder.build(&[], &[], &run.tool_previews) {
                // 上下文包作为附加 system 消息注入，不进入持久历史
                messages.insert(1.min(messages.len()), ChatMessage::system(pack));
            }
        }

        let schemas = self.orchestrator.registry().to_schemas();
        self.llm
            .complete(&messages, &schemas, &self.model)
            .await
            .map_err(EngineError::Llm)
    }

    /// 派发一个工具批次：发射 tool_call / tool_result 事件，把 assistant 载体
    /// 与按请求顺序配对的 tool 消息写回历史
    pub async fn dispatch_tools(
        &self,
        run: &mut RunState,
        calls: Vec<ToolCallRequest>,
    ) -> Vec<(String, ToolResult)> {
        for call in &calls {
            self.emit(
                run,
                EventType::ToolCall,
                json!({
                    "call_id": call.call_id,
                    "tool": call.tool_name,
                    "arguments": call.arguments,
                }),
            );
        }
        run.history.push(ChatMessage::assistant_tool_calls(calls.clone()));

        let results = self.orchestrator.execute_batch(&calls).await;

        for ((call_id, result), call) in results.iter().zip(calls.iter()) {
            let content = result.to_history_content();
            let preview: String = content.chars().take(PREVIEW_CHARS).collect();
            let observation = Observation::from_tool_result(result);
            self.emit(
                run,
                EventType::ToolResult,
                json!({
                    "call_id": call_id,
                    "tool": call.tool_name,
                    "success": result.success,
                    "preview": preview,
                    "observation": serde_json::to_value(&observation).unwrap_or(Value::Null),
                }),
            );
            run.tool_previews.push(PackItem {
                source: PackSource::ToolPreview {
                    tool: call.tool_name.clone(),
                },
                title: call.tool_name.clone(),
                content: preview,
            });
            run.history.push(ChatMessage::tool(call_id.clone(), content));
        }
        results
    }

    /// 构造单工具调用请求
    pub fn single_call(&self, tool: &str, tool_input: Value) -> ToolCallRequest {
        ToolCallRequest {
            call_id: Uuid::new_v4().to_string(),
            tool_name: tool.to_string(),
            arguments: tool_input,
        }
    }

    /// 持久化会话状态（版本号由存储递增）；对话历史一并保存，暂停或失败的
    /// 会话才能在进程重启后续跑
    pub async fn save_session(
        &self,
        session_id: &str,
        strategy: &str,
        status: SessionStatus,
        final_message: &str,
        plan: Option<&TodoList>,
        history: &[ChatMessage],
    ) {
        let state = json!({
            "strategy": strategy,
            "status": status,
            "final_message": final_message,
            "todolist": plan.map(|p| serde_json::to_value(p).unwrap_or(Value::Null)),
            "history": serde_json::to_value(history).unwrap_or(Value::Null),
        });
        if !self.sessions.save_state(session_id, state).await {
            tracing::warn!(session_id, "session state save failed");
        }
    }

    /// 终止性 final_answer：发事件、存会话、组装结果
    pub async fn finish(
        &self,
        mut run: RunState,
        session_id: &str,
        strategy: &str,
        status: SessionStatus,
        final_message: String,
        plan: Option<&TodoList>,
    ) -> ExecutionResult {
        self.emit(
            &mut run,
            EventType::FinalAnswer,
            json!({"message": final_message}),
        );
        self.save_session(session_id, strategy, status, &final_message, plan, &run.history)
            .await;
        ExecutionResult {
            session_id: session_id.to_string(),
            status,
            final_message,
            execution_history: run.events,
            todolist_id: plan.map(|p| p.id.clone()),
            pending_question: None,
        }
    }

    /// 终止性 error：发事件、保留会话可恢复状态、组装失败结果
    pub async fn fail(
        &self,
        mut run: RunState,
        session_id: &str,
        strategy: &str,
        error: EngineError,
        plan: Option<&TodoList>,
    ) -> ExecutionResult {
        let message = error.to_string();
        self.emit(&mut run, EventType::Error, json!({"message": message}));
        self.save_session(
            session_id,
            strategy,
            SessionStatus::Failed,
            &message,
            plan,
            &run.history,
        )
        .await;
        ExecutionResult {
            session_id: session_id.to_string(),
            status: SessionStatus::Failed,
            final_message: message,
            execution_history: run.events,
            todolist_id: plan.map(|p| p.id.clone()),
            pending_question: None,
        }
    }

    /// ask_user 暂停：创建等待检查点并以 paused 终结本次调用
    pub async fn pause_for_user(
        &self,
        run: RunState,
        session_id: &str,
        strategy: &str,
        question: String,
        answer_key: String,
        plan: Option<&TodoList>,
    ) -> ExecutionResult {
        let run_id = Uuid::new_v4().to_string();
        let checkpoint = self
            .checkpoints
            .create_wait_checkpoint(
                run_id.clone(),
                session_id,
                strategy,
                "ask_user",
                "awaiting human input",
                RequiredInputs {
                    required: vec![answer_key],
                },
                json!({"history_len": run.history.len()}),
                Some(question.clone()),
            )
            .await;
        if let Err(e) = checkpoint {
            return self.fail(run, session_id, strategy, e, plan).await;
        }

        self.save_session(
            session_id,
            strategy,
            SessionStatus::Paused,
            &question,
            plan,
            &run.history,
        )
        .await;
        ExecutionResult {
            session_id: session_id.to_string(),
            status: SessionStatus::Paused,
            final_message: String::new(),
            execution_history: run.events,
            todolist_id: plan.map(|p| p.id.clone()),
            pending_question: Some(question),
        }
    }

    /// 思考内容预览事件
    pub fn emit_thinking(&self, run: &mut RunState, content: &str) {
        let preview: String = content.chars().take(PREVIEW_CHARS * 4).collect();
        self.emit(run, EventType::LlmToken, json!({"text": preview}));
    }
}
