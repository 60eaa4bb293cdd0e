//! Plan-and-Execute 策略
//!
//! 先由 LLM 生成封顶 max_plan_steps 的计划，再对每个步骤跑最多
//! max_step_iterations 次 ReAct 子迭代；步骤失败可重规划，次数受限，
//! 耗尽即闭合失败。

use async_trait::async_trait;
use serde_json::Value;

use crate::config::StrategyParams;
use crate::core::EngineError;
use crate::strategy::planned::{PlannedRun, StepMode};
use crate::strategy::runtime::{ExecutionResult, StrategyRuntime};
use crate::strategy::PlanningStrategy;

/// Plan-and-Execute：计划 + 步内多次子迭代
pub struct PlanAndExecute {
    params: StrategyParams,
}

impl PlanAndExecute {
    pub fn new(params: &Value) -> Result<Self, EngineError> {
        Ok(Self {
            params: StrategyParams::from_value(params)?,
        })
    }
}

#[async_trait]
impl PlanningStrategy for PlanAndExecute {
    fn name(&self) -> &str {
        "plan_and_execute"
    }

    async fn execute(
        &self,
        rt: &StrategyRuntime,
        mission: &str,
        session_id: &str,
    ) -> ExecutionResult {
        PlannedRun {
            rt,
            params: &self.params,
            strategy_name: self.name(),
            mode: StepMode::MicroIterations,
            reflect_every: None,
        }
        .run(mission, session_id)
        .await
    }
}
