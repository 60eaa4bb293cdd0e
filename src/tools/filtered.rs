//! 输出过滤工具包装
//!
//! 组合而非继承：包装器持有内部工具实例，转发全部元数据访问，仅对执行结果做
//! 后置变换（如截断超长输出、脱敏）。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{RiskLevel, Tool, ToolResult};

/// 结果后置变换
pub type OutputFilter = dyn Fn(ToolResult) -> ToolResult + Send + Sync;

/// 持有内部工具并在 execute 后应用 filter；其余契约原样转发
pub struct FilteredTool {
    inner: Arc<dyn Tool>,
    filter: Box<OutputFilter>,
}

impl FilteredTool {
    pub fn new(
        inner: Arc<dyn Tool>,
        filter: impl Fn(ToolResult) -> ToolResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            filter: Box::new(filter),
        }
    }

    /// 常用过滤：将成功输出截断到 max_chars 字符
    pub fn truncated(inner: Arc<dyn Tool>, max_chars: usize) -> Self {
        Self::new(inner, move |mut result| {
            if let Some(Value::String(s)) = &result.output {
                if s.chars().count() > max_chars {
                    let cut: String = s.chars().take(max_chars).collect();
                    result.output = Some(Value::String(format!("{}...", cut)));
                }
            }
            result
        })
    }
}

#[async_trait]
impl Tool for FilteredTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters_schema(&self) -> Value {
        self.inner.parameters_schema()
    }

    fn requires_approval(&self) -> bool {
        self.inner.requires_approval()
    }

    fn approval_risk_level(&self) -> RiskLevel {
        self.inner.approval_risk_level()
    }

    fn supports_parallelism(&self) -> bool {
        self.inner.supports_parallelism()
    }

    fn validate_params(&self, args: &Value) -> (bool, Option<String>) {
        self.inner.validate_params(args)
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let result = self.inner.execute(args).await;
        (self.filter)(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;
    use serde_json::json;

    #[tokio::test]
    async fn test_truncates_output_but_forwards_metadata() {
        let inner: Arc<dyn Tool> = Arc::new(EchoTool);
        let wrapped = FilteredTool::truncated(Arc::clone(&inner), 5);

        assert_eq!(wrapped.name(), inner.name());
        assert_eq!(wrapped.supports_parallelism(), inner.supports_parallelism());

        let result = wrapped.execute(json!({"text": "0123456789"})).await;
        assert!(result.success);
        assert_eq!(result.output, Some(json!("01234...")));
    }
}
