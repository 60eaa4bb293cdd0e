//! Thought / Action / Observation 模型与入口规范化
//!
//! LLM 文本输出在进入状态机前统一解析：提取 JSON 块，把历史同义词
//! （complete / finish_step）在摄入边界一次性规范化为 respond。状态机内部
//! 只见封闭的 Action 变体。非 JSON 的纯文本按步骤答案处理，由调用方决定语义。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::EngineError;

/// 封闭的动作变体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// 调用工具
    ToolCall { tool: String, tool_input: Value },
    /// 给出最终回答（任务级终态）
    Respond { summary: String },
    /// 需要人工输入
    AskUser { question: String, answer_key: String },
    /// 请求重新规划
    Replan { reason: String },
}

/// 每轮迭代产出的思考；仅存在于执行历史，不单独持久化
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    #[serde(default)]
    pub step_ref: usize,
    #[serde(default)]
    pub rationale: String,
    pub action: Action,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default)]
    pub confidence: f64,
}

/// 执行动作的观察结果，喂给下一轮思考
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub requires_user: bool,
}

impl Observation {
    /// 由工具执行结果构造；requires_user 只在 ask_user 路径置位
    pub fn from_tool_result(result: &crate::tools::ToolResult) -> Self {
        Self {
            success: result.success,
            data: result.output.clone(),
            error: result.error.clone(),
            requires_user: false,
        }
    }
}

/// 解析结果：结构化 Thought，或无动作载荷的纯文本
#[derive(Debug, Clone)]
pub enum ParsedReply {
    Thought(Thought),
    Plain(String),
}

/// 历史同义词 → 规范动作名；在 JSON 进入 serde 反序列化前改写
fn canonicalize_action_tag(raw: &mut Value) {
    let Some(tag) = raw.get("action").and_then(Value::as_str) else {
        return;
    };
    if tag == "complete" || tag == "finish_step" {
        // 历史输出用 summary 或 result 字段携带答案
        if raw.get("summary").is_none() {
            let fallback = raw
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            raw["summary"] = Value::String(fallback);
        }
        raw["action"] = Value::String("respond".to_string());
    }
}

/// 从 LLM 文本输出中提取 JSON 块（```json 围栏或裸花括号）
fn extract_json_block(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析一次 LLM 回复：含动作 JSON 则规范化为 Thought，否则为纯文本
pub fn parse_reply(output: &str) -> Result<ParsedReply, EngineError> {
    let Some(json_str) = extract_json_block(output) else {
        return Ok(ParsedReply::Plain(output.trim().to_string()));
    };

    let mut raw: Value = match serde_json::from_str(json_str) {
        Ok(v) => v,
        // 文本里偶然出现花括号但不是 JSON：按纯文本处理
        Err(_) => return Ok(ParsedReply::Plain(output.trim().to_string())),
    };

    if raw.get("action").is_none() {
        return Ok(ParsedReply::Plain(output.trim().to_string()));
    }
    canonicalize_action_tag(&mut raw);

    // Thought 包装：{"step_ref":.., "rationale":.., "action":{...}} 或动作平铺
    let thought: Thought = if raw.get("action").map(Value::is_object).unwrap_or(false) {
        let mut inner = raw["action"].take();
        canonicalize_action_tag(&mut inner);
        let action: Action = serde_json::from_value(inner)
            .map_err(|e| EngineError::Validation(format!("bad action payload: {}", e)))?;
        Thought {
            step_ref: raw.get("step_ref").and_then(Value::as_u64).unwrap_or(0) as usize,
            rationale: raw
                .get("rationale")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            action,
            expected_outcome: raw
                .get("expected_outcome")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            confidence: raw.get("confidence").and_then(Value::as_f64).unwrap_or(0.0),
        }
    } else {
        let action: Action = serde_json::from_value(raw)
            .map_err(|e| EngineError::Validation(format!("bad action payload: {}", e)))?;
        Thought {
            step_ref: 0,
            rationale: String::new(),
            action,
            expected_outcome: String::new(),
            confidence: 0.0,
        }
    };

    Ok(ParsedReply::Thought(thought))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_passthrough() {
        match parse_reply("just an answer").unwrap() {
            ParsedReply::Plain(s) => assert_eq!(s, "just an answer"),
            _ => panic!("expected plain"),
        }
    }

    #[test]
    fn test_tool_call_parses() {
        let out = r#"{"action": "tool_call", "tool": "echo", "tool_input": {"text": "hi"}}"#;
        match parse_reply(out).unwrap() {
            ParsedReply::Thought(t) => assert_eq!(
                t.action,
                Action::ToolCall {
                    tool: "echo".into(),
                    tool_input: json!({"text": "hi"})
                }
            ),
            _ => panic!("expected thought"),
        }
    }

    #[test]
    fn test_legacy_synonyms_canonicalized_to_respond() {
        for tag in ["complete", "finish_step"] {
            let out = format!(r#"{{"action": "{}", "summary": "done"}}"#, tag);
            match parse_reply(&out).unwrap() {
                ParsedReply::Thought(t) => {
                    assert_eq!(t.action, Action::Respond { summary: "done".into() })
                }
                _ => panic!("expected thought"),
            }
        }
    }

    #[test]
    fn test_wrapped_thought_with_fenced_json() {
        let out = "Thinking...\n```json\n{\"step_ref\": 2, \"rationale\": \"r\", \
                   \"action\": {\"action\": \"replan\", \"reason\": \"stuck\"}, \
                   \"confidence\": 0.7}\n```";
        match parse_reply(out).unwrap() {
            ParsedReply::Thought(t) => {
                assert_eq!(t.step_ref, 2);
                assert_eq!(t.action, Action::Replan { reason: "stuck".into() });
                assert!((t.confidence - 0.7).abs() < 1e-9);
            }
            _ => panic!("expected thought"),
        }
    }

    #[test]
    fn test_braces_without_action_are_plain() {
        match parse_reply("the set {1, 2} is small").unwrap() {
            ParsedReply::Plain(_) => {}
            _ => panic!("expected plain"),
        }
    }
}
