//! 工具层：能力契约、注册表、有界并发编排与输出过滤包装

pub mod echo;
pub mod filtered;
pub mod orchestrator;
pub mod registry;

pub use echo::EchoTool;
pub use filtered::FilteredTool;
pub use orchestrator::{ToolOrchestrator, DEFAULT_MAX_PARALLEL_TOOLS};
pub use registry::{RiskLevel, Tool, ToolCallRequest, ToolRegistry, ToolResult};
