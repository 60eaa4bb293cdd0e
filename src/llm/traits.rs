//! LLM 协作方抽象
//!
//! 引擎只依赖 complete(messages, tool_schemas, model)；传输、重试、限流属于
//! 具体实现。回复要么是文本内容，要么是一批工具调用请求。

use async_trait::async_trait;
use serde_json::Value;

use crate::memory::ChatMessage;
use crate::tools::ToolCallRequest;

/// 一次 LLM 调用的回复：content 与 tool_calls 至少有其一
#[derive(Clone, Debug, Default)]
pub struct LlmReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl LlmReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls: calls,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；tool_schemas 为注册表导出的工具 schema 列表
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tool_schemas: &[Value],
        model: &str,
    ) -> Result<LlmReply, String>;
}
