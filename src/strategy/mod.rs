//! 规划策略层：状态机家族、动作模型、事件与共享运行时
//!
//! 契约：execute(mission, session_id) 产出有序事件序列，恰以一个 final_answer
//! 或 error 终结；阻塞人工输入时经 ask_user/检查点以 paused 收束而非抛错。
//! 跨进程可重启只依赖外部持久化的会话状态与计划。

pub mod action;
pub mod events;
pub mod native_react;
pub mod plan_execute;
pub mod plan_react;
pub mod planned;
pub mod runtime;
pub mod spar;

use async_trait::async_trait;

pub use action::{parse_reply, Action, Observation, ParsedReply, Thought};
pub use events::{EventType, StreamEvent};
pub use native_react::NativeReact;
pub use plan_execute::PlanAndExecute;
pub use plan_react::PlanAndReact;
pub use planned::REFLECTION_TAG;
pub use runtime::{ExecutionResult, RunState, SessionStatus, StrategyRuntime};
pub use spar::SensePlanActReflect;

/// 规划策略：驱动一次会话从任务到终态的状态机
#[async_trait]
pub trait PlanningStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// 执行一次会话；失败语义在内部处理，绝不向上抛未捕获错误
    async fn execute(
        &self,
        rt: &StrategyRuntime,
        mission: &str,
        session_id: &str,
    ) -> ExecutionResult;
}
