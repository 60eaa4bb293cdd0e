//! 脚本化 Mock LLM 客户端（用于测试，无需 API）
//!
//! 按预置顺序逐条返回回复，耗尽后返回错误；同时记录每次调用收到的消息，
//! 便于测试断言 prompt 内容（如 reflection 标记）。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmReply};
use crate::memory::ChatMessage;

/// 脚本化客户端：replies 依次弹出
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<LlmReply>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<LlmReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 所有调用收到的消息快照
    pub fn calls_seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tool_schemas: &[Value],
        _model: &str,
    ) -> Result<LlmReply, String> {
        self.seen.lock().expect("mock lock").push(messages.to_vec());
        self.replies
            .lock()
            .expect("mock lock")
            .pop_front()
            .ok_or_else(|| "scripted replies exhausted".to_string())
    }
}

/// 恒定失败的客户端，用于测试 LLM 故障路径
pub struct FailingLlm;

#[async_trait]
impl LlmClient for FailingLlm {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tool_schemas: &[Value],
        _model: &str,
    ) -> Result<LlmReply, String> {
        Err("backend unreachable".to_string())
    }
}
