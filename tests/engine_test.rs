//! 引擎端到端测试：策略 × Mock LLM × echo 工具

use std::sync::Arc;

use serde_json::json;

use wasp::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use wasp::core::EngineError;
use wasp::llm::{FailingLlm, LlmClient, LlmReply, ScriptedLlm};
use wasp::session::{MemorySessionStore, SessionStore};
use wasp::strategy::{
    EventType, NativeReact, PlanAndExecute, PlanAndReact, PlanningStrategy,
    SensePlanActReflect, SessionStatus, StrategyRuntime, REFLECTION_TAG,
};
use wasp::tools::{EchoTool, ToolCallRequest, ToolOrchestrator, ToolRegistry};

struct Harness {
    rt: StrategyRuntime,
    sessions: Arc<MemorySessionStore>,
    checkpoints: Arc<MemoryCheckpointStore>,
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("wasp=debug")
            .with_test_writer()
            .try_init();
    });
}

fn harness(llm: Arc<dyn LlmClient>) -> Harness {
    init_tracing();
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    let orchestrator = Arc::new(ToolOrchestrator::new(Arc::new(registry), 3));
    let sessions = Arc::new(MemorySessionStore::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let rt = StrategyRuntime::new(
        llm,
        orchestrator,
        sessions.clone(),
        checkpoints.clone() as Arc<dyn CheckpointStore>,
        "mock-model",
    );
    Harness {
        rt,
        sessions,
        checkpoints,
    }
}

fn echo_call(id: &str, text: &str) -> ToolCallRequest {
    ToolCallRequest {
        call_id: id.to_string(),
        tool_name: "echo".to_string(),
        arguments: json!({"text": text}),
    }
}

#[tokio::test]
async fn test_plan_and_execute_end_to_end() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        LlmReply::text(r#"[{"description":"s1"},{"description":"s2"},{"description":"s3"}]"#),
        LlmReply::calls(vec![echo_call("c1", "a")]),
        LlmReply::text("step 1 done"),
        LlmReply::calls(vec![echo_call("c2", "b")]),
        LlmReply::text("step 2 done"),
        LlmReply::calls(vec![echo_call("c3", "c")]),
        LlmReply::text("step 3 done"),
    ]));
    let h = harness(llm);
    let strategy = PlanAndExecute::new(&json!({"max_plan_steps": 3})).unwrap();

    let result = strategy.execute(&h.rt, "do three things", "sess-e2e").await;

    assert_eq!(result.status, SessionStatus::Completed);
    let last = result.execution_history.last().unwrap();
    assert_eq!(last.event_type, EventType::FinalAnswer);
    assert!(result.final_message.contains("3/3"));
    assert!(result.todolist_id.is_some());

    // 每个工具调用都成功且按序
    let tool_results: Vec<_> = result
        .execution_history
        .iter()
        .filter(|e| e.event_type == EventType::ToolResult)
        .collect();
    assert_eq!(tool_results.len(), 3);
    assert!(tool_results.iter().all(|e| e.data["success"] == true));

    // 会话状态已持久化且带版本
    assert!(h.sessions.load_state("sess-e2e").await.is_some());
    assert_eq!(h.sessions.version_of("sess-e2e"), Some(1));
}

#[tokio::test]
async fn test_early_respond_skips_pending_items() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        LlmReply::text(r#"[{"description":"s1"},{"description":"s2"}]"#),
        LlmReply::text(r#"{"action":"respond","summary":"all done early"}"#),
    ]));
    let h = harness(llm);
    let strategy = PlanAndExecute::new(&json!({})).unwrap();

    let result = strategy.execute(&h.rt, "mission", "sess-early").await;
    assert_eq!(result.status, SessionStatus::Completed);
    assert_eq!(result.final_message, "all done early");

    let state = h.sessions.load_state("sess-early").await.unwrap();
    let items = state["todolist"]["items"].as_array().unwrap();
    assert_eq!(items[0]["status"], "COMPLETED");
    assert_eq!(items[1]["status"], "SKIPPED");
}

#[tokio::test]
async fn test_forward_dependency_executes_after_its_prerequisite() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        LlmReply::text(r#"[{"description":"a","dependencies":[2]},{"description":"b"}]"#),
        LlmReply::text("done b"),
        LlmReply::text("done a"),
    ]));
    let llm_ref = llm.clone();
    let h = harness(llm);
    let strategy = PlanAndExecute::new(&json!({})).unwrap();

    let result = strategy.execute(&h.rt, "mission", "sess-fwd").await;
    assert_eq!(result.status, SessionStatus::Completed);

    // 两步都执行了，没有步骤被跳过
    let state = h.sessions.load_state("sess-fwd").await.unwrap();
    let items = state["todolist"]["items"].as_array().unwrap();
    assert!(items.iter().all(|i| i["status"] == "COMPLETED"));

    // 步骤 2 先执行，步骤 1 推迟到其依赖完成之后
    let calls = llm_ref.calls_seen();
    let focus = |i: usize| calls[i].last().unwrap().content.clone();
    assert!(focus(1).contains("Current step 2"));
    assert!(focus(2).contains("Current step 1"));
}

#[tokio::test]
async fn test_legacy_finish_step_canonicalized_to_respond() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        LlmReply::text(r#"[{"description":"s1"},{"description":"s2"}]"#),
        LlmReply::text(r#"{"action":"finish_step","summary":"done via legacy tag"}"#),
    ]));
    let h = harness(llm);
    let strategy = PlanAndExecute::new(&json!({})).unwrap();

    let result = strategy.execute(&h.rt, "mission", "sess-legacy").await;
    assert_eq!(result.status, SessionStatus::Completed);
    assert_eq!(result.final_message, "done via legacy tag");
}

#[tokio::test]
async fn test_ask_user_pauses_with_checkpoint_then_resumes_once() {
    let llm = Arc::new(ScriptedLlm::new(vec![LlmReply::text(
        r#"{"action":"ask_user","question":"Which region?","answer_key":"region"}"#,
    )]));
    let h = harness(llm);
    let strategy = NativeReact::new(&json!({})).unwrap();

    let result = strategy.execute(&h.rt, "deploy", "sess-pause").await;
    assert_eq!(result.status, SessionStatus::Paused);
    assert_eq!(result.pending_question.as_deref(), Some("Which region?"));

    // 暂停时会话状态携带完整对话历史，进程重启后可续跑
    let state = h.sessions.load_state("sess-pause").await.unwrap();
    let history = state["history"].as_array().unwrap();
    assert!(history.len() >= 2);
    assert_eq!(history[0]["role"], "system");

    let waiting = h.checkpoints.list_waiting().await;
    assert_eq!(waiting.len(), 1);
    let run_id = waiting[0].run_id.clone();

    // 缺必填键 → ValidationError 并点名缺键
    match h.rt.checkpoints().resume(&run_id, json!({"other": 1})).await {
        Err(EngineError::Validation(msg)) => assert!(msg.contains("region")),
        other => panic!("expected validation error, got {:?}", other.is_ok()),
    }

    let resumed = h
        .rt
        .checkpoints()
        .resume(&run_id, json!({"region": "eu"}))
        .await
        .unwrap();
    assert_eq!(resumed.state["latest_resume_event"]["region"], "eu");

    // 一次性：二次恢复被拒
    assert!(matches!(
        h.rt.checkpoints().resume(&run_id, json!({"region": "us"})).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn test_llm_failure_emits_error_and_keeps_session() {
    let h = harness(Arc::new(FailingLlm));
    let strategy = NativeReact::new(&json!({})).unwrap();

    let result = strategy.execute(&h.rt, "mission", "sess-err").await;
    assert_eq!(result.status, SessionStatus::Failed);
    let last = result.execution_history.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    // 会话状态完好且带历史，可恢复
    let state = h.sessions.load_state("sess-err").await.unwrap();
    assert!(state["history"].as_array().is_some());
}

#[tokio::test]
async fn test_native_react_ceiling_yields_partial_answer() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        LlmReply::calls(vec![echo_call("c1", "x")]),
        LlmReply::calls(vec![echo_call("c2", "y")]),
    ]));
    let h = harness(llm);
    let strategy = NativeReact::new(&json!({"max_step_iterations": 2})).unwrap();

    let result = strategy.execute(&h.rt, "mission", "sess-ceiling").await;
    assert_eq!(result.status, SessionStatus::Completed);
    assert!(result.final_message.contains("ceiling"));
    assert_eq!(
        result.execution_history.last().unwrap().event_type,
        EventType::FinalAnswer
    );
}

#[tokio::test]
async fn test_plan_and_react_one_call_per_step() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        LlmReply::text(r#"[{"description":"s1"},{"description":"s2"}]"#),
        LlmReply::calls(vec![echo_call("c1", "tool answer")]),
        LlmReply::text("plain answer"),
    ]));
    let llm_ref = llm.clone();
    let h = harness(llm);
    let strategy = PlanAndReact::new(&json!({})).unwrap();

    let result = strategy.execute(&h.rt, "mission", "sess-par").await;
    assert_eq!(result.status, SessionStatus::Completed);
    // 计划一次 + 每步恰一次
    assert_eq!(llm_ref.calls_seen().len(), 3);
}

#[tokio::test]
async fn test_spar_reflection_prompt_is_tagged() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        LlmReply::text(r#"[{"description":"s1"},{"description":"s2"}]"#),
        LlmReply::text("done 1"),
        LlmReply::text("OK"),
        LlmReply::text("done 2"),
        LlmReply::text("OK"),
    ]));
    let llm_ref = llm.clone();
    let h = harness(llm);
    let strategy =
        SensePlanActReflect::new(&json!({"reflect_every_step": 1, "max_reflection_iterations": 3}))
            .unwrap();

    let result = strategy.execute(&h.rt, "mission", "sess-spar").await;
    assert_eq!(result.status, SessionStatus::Completed);

    // 至少一次调用的末尾消息携带反思标记
    let reflected = llm_ref.calls_seen().iter().any(|msgs| {
        msgs.last()
            .map(|m| m.content.contains(REFLECTION_TAG))
            .unwrap_or(false)
    });
    assert!(reflected, "no reflection-tagged prompt observed");
}

#[tokio::test]
async fn test_spar_reflection_can_trigger_replan() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        LlmReply::text(r#"[{"description":"s1"},{"description":"s2"}]"#),
        LlmReply::text("done 1"),
        LlmReply::text(r#"{"action":"replan","reason":"s2 is stale"}"#),
        // 重规划出的新尾部
        LlmReply::text(r#"[{"description":"s2 revised"}]"#),
        LlmReply::text("done revised"),
        LlmReply::text("OK"),
    ]));
    let h = harness(llm);
    let strategy =
        SensePlanActReflect::new(&json!({"reflect_every_step": 1, "max_reflection_iterations": 2}))
            .unwrap();

    let result = strategy.execute(&h.rt, "mission", "sess-replan").await;
    assert_eq!(result.status, SessionStatus::Completed);

    let state = h.sessions.load_state("sess-replan").await.unwrap();
    let items = state["todolist"]["items"].as_array().unwrap();
    assert!(items
        .iter()
        .any(|i| i["description"] == "s2 revised" && i["status"] == "COMPLETED"));
}

#[tokio::test]
async fn test_replan_budget_fails_closed() {
    // 每步都要求重规划，额度 1 次，第二次请求即闭合失败
    let llm = Arc::new(ScriptedLlm::new(vec![
        LlmReply::text(r#"[{"description":"s1"}]"#),
        LlmReply::text(r#"{"action":"replan","reason":"try again"}"#),
        LlmReply::text(r#"[{"description":"s1 retry"}]"#),
        LlmReply::text(r#"{"action":"replan","reason":"still stuck"}"#),
    ]));
    let h = harness(llm);
    let strategy = PlanAndExecute::new(&json!({"max_replans": 1})).unwrap();

    let result = strategy.execute(&h.rt, "mission", "sess-closed").await;
    assert_eq!(result.status, SessionStatus::Failed);
    assert!(result.final_message.contains("Replan budget exhausted"));
    assert_eq!(
        result.execution_history.last().unwrap().event_type,
        EventType::FinalAnswer
    );
}

#[tokio::test]
async fn test_events_streamed_on_channel_match_history() {
    let llm = Arc::new(ScriptedLlm::new(vec![LlmReply::text("direct answer")]));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    let rt = StrategyRuntime::new(
        llm,
        Arc::new(ToolOrchestrator::new(Arc::new(registry), 2)),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryCheckpointStore::new()) as Arc<dyn CheckpointStore>,
        "mock-model",
    )
    .with_event_tx(tx);

    let strategy = NativeReact::new(&json!({})).unwrap();
    let result = strategy.execute(&rt, "mission", "sess-stream").await;

    let mut streamed = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        streamed.push(ev);
    }
    assert_eq!(streamed.len(), result.execution_history.len());
    assert_eq!(
        streamed.last().unwrap().event_type,
        EventType::FinalAnswer
    );
}

#[tokio::test]
async fn test_non_object_params_fail_before_execution() {
    assert!(matches!(
        PlanAndExecute::new(&json!([1, 2, 3])),
        Err(EngineError::Config(_))
    ));
    assert!(matches!(
        NativeReact::new(&json!("x")),
        Err(EngineError::Config(_))
    ));
}
