//! 上下文层：消息模型、Token 预算、确定性压缩与上下文包

pub mod budget;
pub mod compactor;
pub mod message;
pub mod pack;

pub use budget::{ContextBudget, TokenEstimator};
pub use compactor::{deterministic_compression, summarize_stale_block};
pub use message::{ChatMessage, Role};
pub use pack::{ContextPackBuilder, FirstCharsSelector, ItemSelector, PackItem, PackPolicy, PackSource};
