//! Token 预算控制
//!
//! 字符计数近似估算对话 token 成本；ContextBudget 在每次 LLM 调用前作为
//! 是否需要压缩的布尔闸门。不追求精确计数，上限留有余量即可。

use crate::memory::ChatMessage;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 启发式规则：英文约 4 字符/token，非 ASCII（中文等）约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;
        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }
        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    /// 估算单条消息（含工具调用参数）的 token 成本
    pub fn estimate_message(msg: &ChatMessage) -> usize {
        let mut total = Self::estimate(&msg.content);
        for call in &msg.tool_calls {
            total += Self::estimate(&call.tool_name);
            total += Self::estimate(&call.arguments.to_string());
        }
        total
    }

    /// 估算整个对话的 token 成本
    pub fn estimate_conversation(messages: &[ChatMessage]) -> usize {
        messages.iter().map(Self::estimate_message).sum()
    }
}

/// 上下文预算：最大输入 token 与触发压缩的下限阈值
#[derive(Clone, Copy, Debug)]
pub struct ContextBudget {
    /// 最大输入 token 预算
    pub max_input_tokens: usize,
    /// 超过此阈值即触发压缩（低于 max_input_tokens，留出增长余量）
    pub compact_trigger_tokens: usize,
}

impl ContextBudget {
    pub fn new(max_input_tokens: usize, compact_trigger_tokens: usize) -> Self {
        Self {
            max_input_tokens,
            compact_trigger_tokens: compact_trigger_tokens.min(max_input_tokens),
        }
    }

    /// 估算对话总成本
    pub fn estimate(&self, messages: &[ChatMessage]) -> usize {
        TokenEstimator::estimate_conversation(messages)
    }

    /// 是否需要立即压缩
    pub fn needs_compaction(&self, messages: &[ChatMessage]) -> bool {
        self.estimate(messages) > self.compact_trigger_tokens
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        // 默认 8K 输入预算，6K 触发压缩
        Self::new(8000, 6000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimator_english() {
        let text = "Hello, world! This is a test.";
        let tokens = TokenEstimator::estimate(text);
        assert!(tokens > 0);
        assert!(tokens < text.len());
    }

    #[test]
    fn test_estimator_chinese() {
        let tokens = TokenEstimator::estimate("你好世界，这是一个测试。");
        assert!(tokens > 0);
    }

    #[test]
    fn test_trigger_below_max() {
        let budget = ContextBudget::new(100, 500);
        assert_eq!(budget.compact_trigger_tokens, 100);
    }

    #[test]
    fn test_needs_compaction_gate() {
        let budget = ContextBudget::new(1000, 10);
        let small = vec![ChatMessage::user("hi")];
        assert!(!budget.needs_compaction(&small));
        let big = vec![ChatMessage::user("x".repeat(400))];
        assert!(budget.needs_compaction(&big));
    }
}
