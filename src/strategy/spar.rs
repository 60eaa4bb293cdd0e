//! Sense-Plan-Act-Reflect（SPAR）策略
//!
//! 在 Plan-and-Execute 之上，每完成 reflect_every_step 步插入一次反思调用，
//! 总次数受 max_reflection_iterations；反思提示携带可区分的标记，回顾最近
//! 观察并可触发重规划。

use async_trait::async_trait;
use serde_json::Value;

use crate::config::StrategyParams;
use crate::core::EngineError;
use crate::strategy::planned::{PlannedRun, StepMode};
use crate::strategy::runtime::{ExecutionResult, StrategyRuntime};
use crate::strategy::PlanningStrategy;

/// SPAR：计划 + 周期性反思
pub struct SensePlanActReflect {
    params: StrategyParams,
}

impl SensePlanActReflect {
    pub fn new(params: &Value) -> Result<Self, EngineError> {
        Ok(Self {
            params: StrategyParams::from_value(params)?,
        })
    }
}

#[async_trait]
impl PlanningStrategy for SensePlanActReflect {
    fn name(&self) -> &str {
        "spar"
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
            reflect_every: Some(self.params.reflect_every_step),
        }
        .run(mission, session_id)
        .await
    }
}
