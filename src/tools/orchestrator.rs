//! 工具调用编排器
//!
//! 输入一次 LLM 回合请求的有序工具调用批次：按原始顺序扫描，连续的可并发调用
//! 聚成一段并在 Semaphore 限流下并发执行；遇到不可并发调用先冲刷当前段、再单独
//! 执行该调用。结果始终按请求顺序返回（与完成顺序无关），以保证对话历史中
//! tool 消息与 call_id 的位置配对。批次之间编排器无状态。

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::tools::{ToolCallRequest, ToolRegistry, ToolResult};

/// 默认工具并发上限
pub const DEFAULT_MAX_PARALLEL_TOOLS: usize = 3;

/// 编排器：持有注册表与并发上限；一个调用失败不影响同段其余调用
pub struct ToolOrchestrator {
    registry: Arc<ToolRegistry>,
    semaphore: Arc<Semaphore>,
}

impl ToolOrchestrator {
    pub fn new(registry: Arc<ToolRegistry>, max_parallel_tools: usize) -> Self {
        Self {
            registry,
            semaphore: Arc::new(Semaphore::new(max_parallel_tools.max(1))),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行一个批次，返回与请求同序的 (call_id, ToolResult) 序列
    pub async fn execute_batch(
        &self,
        batch: &[ToolCallRequest],
    ) -> Vec<(String, ToolResult)> {
        let mut results: Vec<Option<ToolResult>> = vec![None; batch.len()];
        // 当前累积的可并发段（原始下标）
        let mut run: Vec<usize> = Vec::new();

        for (idx, req) in batch.iter().enumerate() {
            let parallel_ok = self
                .registry
                .get(&req.tool_name)
                .map(|t| t.supports_parallelism())
                // 未知工具只会产出一条失败结果，按可并发处理
                .unwrap_or(true);

            if parallel_ok {
                run.push(idx);
                continue;
            }

            self.flush_run(batch, &mut run, &mut results).await;
            // 不可并发调用单独执行
            results[idx] = Some(self.execute_one(req).await);
        }
        self.flush_run(batch, &mut run, &mut results).await;

        batch
            .iter()
            .zip(results)
            .map(|(req, r)| {
                (
                    req.call_id.clone(),
                    r.unwrap_or_else(|| ToolResult::failed("not executed", "internal")),
                )
            })
            .collect()
    }

    /// 并发冲刷当前段，并发度受 semaphore 限制；结果按下标写回
    async fn flush_run(
        &self,
        batch: &[ToolCallRequest],
        run: &mut Vec<usize>,
        results: &mut [Option<ToolResult>],
    ) {
        if run.is_empty() {
            return;
        }
        let futures = run.iter().map(|&idx| {
            let req = &batch[idx];
            let sem = Arc::clone(&self.semaphore);
            async move {
                let _permit = sem.acquire_owned().await.expect("semaphore closed");
                (idx, self.execute_one(req).await)
            }
        });
        for (idx, result) in join_all(futures).await {
            results[idx] = Some(result);
        }
        run.clear();
    }

    /// 执行单个调用：未知工具与参数校验失败都转为失败的 ToolResult，不向上抛
    async fn execute_one(&self, req: &ToolCallRequest) -> ToolResult {
        let start = std::time::Instant::now();
        let result = match self.registry.get(&req.tool_name) {
            None => ToolResult::failed(
                format!("Unknown tool: {}", req.tool_name),
                "not_found",
            ),
            Some(tool) => {
                let (ok, err) = tool.validate_params(&req.arguments);
                if !ok {
                    ToolResult::failed(
                        err.unwrap_or_else(|| "invalid parameters".to_string()),
                        "validation",
                    )
                } else {
                    tool.execute(req.arguments.clone()).await
                }
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": req.tool_name,
            "call_id": req.call_id,
            "ok": result.success,
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::{Duration, Instant};

    use crate::tools::Tool;

    struct SleepTool {
        name: String,
        parallel: bool,
        delay_ms: u64,
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "sleep then echo own name"
        }

        fn supports_parallelism(&self) -> bool {
            self.parallel
        }

        async fn execute(&self, _args: Value) -> ToolResult {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            ToolResult::ok(json!(self.name), "done")
        }
    }

    fn registry_with(tools: Vec<SleepTool>) -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        for t in tools {
            reg.register(t);
        }
        Arc::new(reg)
    }

    fn req(id: &str, tool: &str) -> ToolCallRequest {
        ToolCallRequest {
            call_id: id.to_string(),
            tool_name: tool.to_string(),
            arguments: json!({}),
        }
    }

    #[tokio::test]
    async fn test_parallel_run_overlaps() {
        let reg = registry_with(vec![
            SleepTool { name: "a".into(), parallel: true, delay_ms: 250 },
            SleepTool { name: "b".into(), parallel: true, delay_ms: 250 },
        ]);
        let orch = ToolOrchestrator::new(reg, 2);

        let start = Instant::now();
        let results = orch.execute_batch(&[req("c1", "a"), req("c2", "b")]).await;
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(450), "elapsed: {:?}", elapsed);
        assert_eq!(results[0].0, "c1");
        assert_eq!(results[1].0, "c2");
        assert_eq!(results[0].1.output, Some(json!("a")));
        assert_eq!(results[1].1.output, Some(json!("b")));
    }

    #[tokio::test]
    async fn test_serial_then_parallel_keeps_request_order() {
        let reg = registry_with(vec![
            SleepTool { name: "serial".into(), parallel: false, delay_ms: 10 },
            SleepTool { name: "par".into(), parallel: true, delay_ms: 10 },
        ]);
        let orch = ToolOrchestrator::new(reg, 4);

        let results = orch
            .execute_batch(&[req("c1", "serial"), req("c2", "par")])
            .await;
        assert_eq!(results[0].0, "c1");
        assert_eq!(results[0].1.output, Some(json!("serial")));
        assert_eq!(results[1].0, "c2");
        assert_eq!(results[1].1.output, Some(json!("par")));
    }

    #[tokio::test]
    async fn test_failure_isolated_to_its_call_id() {
        let reg = registry_with(vec![SleepTool {
            name: "a".into(),
            parallel: true,
            delay_ms: 1,
        }]);
        let orch = ToolOrchestrator::new(reg, 2);

        let results = orch.execute_batch(&[req("c1", "a"), req("c2", "missing")]).await;
        assert!(results[0].1.success);
        assert!(!results[1].1.success);
        assert_eq!(results[1].1.error_type.as_deref(), Some("not_found"));
    }
}
