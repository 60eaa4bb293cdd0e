//! 执行过程事件
//!
//! StreamEvent 是对外可观察的唯一线格式：{event_type, data, timestamp}，
//! 对 HTTP 流式、CLI 渲染等传输保持稳定。事件本身是瞬态的，是否持久化为
//! 执行历史由调用方决定。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StepStart,
    LlmToken,
    ToolCall,
    ToolResult,
    PlanUpdated,
    FinalAnswer,
    Error,
}

/// 单条过程事件（ISO-8601 时间戳）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_type: EventType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }
}
