//! Wasp - Rust 智能体执行引擎
//!
//! 模块划分：
//! - **config**: 策略参数包（保守默认值，非法即快速失败）
//! - **core**: 错误分类
//! - **llm**: LLM 协作方抽象与脚本化 Mock
//! - **memory**: 消息模型、Token 预算、确定性压缩、上下文包
//! - **plan**: 依赖校验过的计划模型
//! - **session**: 会话状态存储契约与内存实现
//! - **checkpoint**: 暂停/恢复检查点
//! - **strategy**: 规划策略状态机（Native-ReAct / Plan-and-Execute /
//!   Plan-and-React / SPAR）与共享运行时
//! - **tools**: 工具契约、注册表与有界并发编排器

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod plan;
pub mod session;
pub mod strategy;
pub mod tools;

pub use crate::core::EngineError;
pub use config::StrategyParams;
pub use strategy::{ExecutionResult, PlanningStrategy, SessionStatus, StrategyRuntime};
