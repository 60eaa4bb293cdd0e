//! 工具契约与注册表
//!
//! 所有可调用能力实现 Tool trait（name / description / parameters_schema /
//! supports_parallelism / validate_params / execute），由 ToolRegistry 按名注册与查找。
//! 注册表由组合根显式构造并注入，不做模块级单例。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 审批风险等级（供上层审批流使用，引擎本身不拦截）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// 一次 LLM 回合请求的单个工具调用；call_id 在批内唯一
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// 工具执行结果；编排器在调用期间持有，之后并入对话历史
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl ToolResult {
    pub fn ok(output: Value, message: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output),
            message: message.into(),
            error: None,
            error_type: None,
            metadata: Value::Null,
        }
    }

    pub fn failed(error: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            message: String::new(),
            error: Some(error.into()),
            error_type: Some(error_type.into()),
            metadata: Value::Null,
        }
    }

    /// 写入对话历史的文本形式
    pub fn to_history_content(&self) -> String {
        if self.success {
            match &self.output {
                Some(v) if !v.is_null() => v.to_string(),
                _ => self.message.clone(),
            }
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown"))
        }
    }
}

/// 工具 trait：统一的能力契约，异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 tool_name 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    /// 默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 是否需要人工审批
    fn requires_approval(&self) -> bool {
        false
    }

    /// 审批风险等级
    fn approval_risk_level(&self) -> RiskLevel {
        RiskLevel::Low
    }

    /// 是否支持与同批其他调用安全并发执行
    fn supports_parallelism(&self) -> bool {
        true
    }

    /// 执行前参数校验：(是否通过, 错误信息)
    fn validate_params(&self, _args: &Value) -> (bool, Option<String>) {
        (true, None)
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> ToolResult;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，由组合根构造后注入编排器
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 生成工具 schema JSON 列表，随每次 LLM 调用下发
    pub fn to_schemas(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect()
    }
}
