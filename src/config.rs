//! 策略参数配置
//!
//! 每个策略共享同一参数面：步内迭代上限、计划步数上限、反思周期等，均有
//! 保守默认值。参数包必须是 JSON 对象，非法（如数组、字符串）在执行开始前
//! 即以 ConfigError 快速失败。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::EngineError;

fn default_max_step_iterations() -> usize {
    5
}

fn default_max_plan_steps() -> usize {
    10
}

fn default_reflect_every_step() -> usize {
    3
}

fn default_max_reflection_iterations() -> usize {
    3
}

fn default_max_replans() -> usize {
    2
}

/// 策略参数包
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    /// 单步内 ReAct 子迭代上限（Native-ReAct 用作全局步数上限）
    pub max_step_iterations: usize,
    /// LLM 生成计划的步数上限
    pub max_plan_steps: usize,
    /// SPAR：每完成 N 步做一次反思
    pub reflect_every_step: usize,
    /// SPAR：反思次数上限
    pub max_reflection_iterations: usize,
    /// 重规划次数上限，耗尽后闭合失败
    pub max_replans: usize,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            max_step_iterations: default_max_step_iterations(),
            max_plan_steps: default_max_plan_steps(),
            reflect_every_step: default_reflect_every_step(),
            max_reflection_iterations: default_max_reflection_iterations(),
            max_replans: default_max_replans(),
        }
    }
}

impl StrategyParams {
    /// 从调用方传入的参数包解析；非对象立即返回 ConfigError
    pub fn from_value(raw: &Value) -> Result<Self, EngineError> {
        if raw.is_null() {
            return Ok(Self::default());
        }
        if !raw.is_object() {
            return Err(EngineError::Config(format!(
                "strategy params must be an object, got: {}",
                raw
            )));
        }
        let params: StrategyParams = serde_json::from_value(raw.clone())
            .map_err(|e| EngineError::Config(format!("invalid strategy params: {}", e)))?;
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.max_step_iterations == 0 {
            return Err(EngineError::Config("max_step_iterations must be >= 1".into()));
        }
        if self.max_plan_steps == 0 {
            return Err(EngineError::Config("max_plan_steps must be >= 1".into()));
        }
        if self.reflect_every_step == 0 {
            return Err(EngineError::Config("reflect_every_step must be >= 1".into()));
        }
        Ok(())
    }
}
