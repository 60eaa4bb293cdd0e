//! Plan-and-React 策略
//!
//! 计划生成与 Plan-and-Execute 相同，但每个步骤只做一次 LLM 调用：
//! 调用返回的工具结果或文本即为该步答案。

use async_trait::async_trait;
use serde_json::Value;

use crate::config::StrategyParams;
use crate::core::EngineError;
use crate::strategy::planned::{PlannedRun, StepMode};
use crate::strategy::runtime::{ExecutionResult, StrategyRuntime};
use crate::strategy::PlanningStrategy;

/// Plan-and-React：计划 + 每步单次调用
pub struct PlanAndReact {
    params: StrategyParams,
}

impl PlanAndReact {
    pub fn new(params: &Value) -> Result<Self, EngineError> {
        Ok(Self {
            params: StrategyParams::from_value(params)?,
        })
    }
}

#[async_trait]
impl PlanningStrategy for PlanAndReact {
    fn name(&self) -> &str {
        "plan_and_react"
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
            mode: StepMode::SingleCall,
            reflect_every: None,
        }
        .run(mission, session_id)
        .await
    }
}
