//! 对话历史压缩
//!
//! 确定性压缩是纯函数：同输入同输出，不重排消息，不删首条 system 消息，
//! 始终保留最近 K 轮交换。从旧端裁剪时绝不把 tool 消息与携带其 call_id 的
//! assistant 消息拆开——若按年龄的切点会拆散配对，则把切点向更早方向回退
//! （多保留，绝不少保留），直到配对被整体保留或整体丢弃。
//!
//! 可选的 LLM 摘要是严格的第二遍：仅在确定性裁剪后仍超限且陈旧块足够大时，
//! 用一条合成摘要消息替换陈旧块；它是非确定性的，绝不替代第一遍。

use crate::core::EngineError;
use crate::llm::LlmClient;
use crate::memory::{ChatMessage, ContextBudget, Role, TokenEstimator};

/// 确定性压缩：在预算内时为恒等（幂等）；超限时从旧端裁剪
pub fn deterministic_compression(
    messages: &[ChatMessage],
    budget: &ContextBudget,
    keep_recent_exchanges: usize,
) -> Vec<ChatMessage> {
    if !budget.needs_compaction(messages) {
        return messages.to_vec();
    }

    let start = leading_system_offset(messages);
    // 尾部窗口：最近 K 轮交换，每轮约 user+assistant 两条
    let tail_start = messages
        .len()
        .saturating_sub(keep_recent_exchanges * 2)
        .max(start);

    let mut kept_cost = TokenEstimator::estimate_conversation(messages);

    // 从旧端推进切点，直到进入预算或触及尾部窗口
    let mut cut = start;
    while cut < tail_start && kept_cost > budget.max_input_tokens {
        kept_cost -= TokenEstimator::estimate_message(&messages[cut]);
        cut += 1;
    }

    cut = repair_pair_cut(messages, start, cut);

    let mut result: Vec<ChatMessage> = messages[..start].to_vec();
    result.extend_from_slice(&messages[cut..]);
    result
}

/// 首条 system 消息占位（0 或 1）
fn leading_system_offset(messages: &[ChatMessage]) -> usize {
    usize::from(matches!(messages.first(), Some(m) if m.role == Role::System))
}

/// 切点修复：若切点落在 tool 消息上且其 assistant 载体已被丢弃，则把切点
/// 回退到该载体处（多保留）；输入本身就孤立的 tool 消息无配对可保，跳过丢弃
fn repair_pair_cut(messages: &[ChatMessage], start: usize, mut cut: usize) -> usize {
    loop {
        let Some(msg) = messages.get(cut) else { break };
        if msg.role != Role::Tool {
            break;
        }
        let Some(call_id) = msg.tool_call_id.as_deref() else {
            cut += 1;
            continue;
        };
        match messages[start..cut]
            .iter()
            .position(|m| m.carries_call(call_id))
        {
            Some(offset) => cut = start + offset,
            None => cut += 1,
        }
    }
    cut
}

/// LLM 摘要第二遍：确定性裁剪后仍超过 summarize_over_tokens 时，把 system 头
/// 与尾部窗口之间的陈旧块替换为一条合成摘要消息。块边界同样做配对修复。
pub async fn summarize_stale_block(
    llm: &dyn LlmClient,
    model: &str,
    messages: Vec<ChatMessage>,
    budget: &ContextBudget,
    keep_recent_exchanges: usize,
    summarize_over_tokens: usize,
) -> Result<Vec<ChatMessage>, EngineError> {
    if TokenEstimator::estimate_conversation(&messages) <= summarize_over_tokens {
        return Ok(messages);
    }

    let start = leading_system_offset(&messages);
    let mut tail_start = messages
        .len()
        .saturating_sub(keep_recent_exchanges * 2)
        .max(start);
    tail_start = repair_pair_cut(&messages, start, tail_start);
    if tail_start <= start {
        return Ok(messages);
    }

    let stale: String = messages[start..tail_start]
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = vec![
        ChatMessage::system(
            "Summarize the following conversation fragment in a few sentences. \
             Keep facts, decisions and tool outcomes. Reply with the summary only.",
        ),
        ChatMessage::user(stale),
    ];
    let reply = llm
        .complete(&prompt, &[], model)
        .await
        .map_err(EngineError::Llm)?;
    let summary = reply.content.unwrap_or_default();
    if summary.is_empty() {
        return Ok(messages);
    }

    let mut result: Vec<ChatMessage> = messages[..start].to_vec();
    result.push(ChatMessage::system(format!(
        "Previous conversation summary:\n\n{}",
        summary
    )));
    result.extend_from_slice(&messages[tail_start..]);
    Ok(result)
}
