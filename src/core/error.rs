//! 引擎错误类型
//!
//! 分层约定：工具失败转为失败的 Observation 回灌循环，由策略决定重试或上报；
//! 策略级失败（LLM 不可达、计划非法）以终止性 error 事件上报但保持会话可恢复；
//! resume 协议违规（未知 run、状态错误、缺字段）同步返回给调用方。

use thiserror::Error;

/// 引擎运行过程中可能出现的错误（规划、工具、LLM、配置、校验等）
#[derive(Error, Debug)]
pub enum EngineError {
    /// 计划生成或校验失败（如循环依赖、计划 JSON 非法）
    #[error("Planning error: {0}")]
    Planning(String),

    /// 工具执行失败，附带工具名
    #[error("Tool error [{tool}]: {message}")]
    Tool { tool: String, message: String },

    /// LLM 协作方调用失败
    #[error("LLM error: {0}")]
    Llm(String),

    /// 策略参数非法（如参数包不是对象）
    #[error("Config error: {0}")]
    Config(String),

    /// 显式取消
    #[error("Cancelled")]
    Cancelled,

    /// Schema / 不变量违规（如 resume 载荷缺少必填键）
    #[error("Validation error: {0}")]
    Validation(String),

    /// 未知的会话或 run id
    #[error("Not found: {0}")]
    NotFound(String),
}
