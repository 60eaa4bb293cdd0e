//! Echo 工具：回显输入文本，用于打通执行链路与测试

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolResult};

/// Echo 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoArgs {
    /// 要回显的文本
    pub text: String,
}

/// 回显工具
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input text back. Args: {\"text\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(EchoArgs)).unwrap_or_else(|_| json!({}))
    }

    fn validate_params(&self, args: &Value) -> (bool, Option<String>) {
        match serde_json::from_value::<EchoArgs>(args.clone()) {
            Ok(_) => (true, None),
            Err(e) => (false, Some(format!("invalid echo args: {}", e))),
        }
    }

    async fn execute(&self, args: Value) -> ToolResult {
        match serde_json::from_value::<EchoArgs>(args) {
            Ok(parsed) => ToolResult::ok(json!(parsed.text), "echoed"),
            Err(e) => ToolResult::failed(e.to_string(), "validation"),
        }
    }
}
