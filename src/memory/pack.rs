//! 上下文包构建
//!
//! 在对话历史之外注入一块严格限额的辅助上下文：记忆条目、技能说明、最近的
//! 工具结果预览。策略由 PackPolicy 约束；条目渲染通过命名的 ItemSelector
//! 插拔，替换摘要方式无需改动调用方契约。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// 条目来源
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackSource {
    /// 记忆条目
    Memory,
    /// 激活的技能说明
    Skill,
    /// 工具结果预览（附工具名）
    ToolPreview { tool: String },
}

/// 候选条目
#[derive(Clone, Debug)]
pub struct PackItem {
    pub source: PackSource,
    pub title: String,
    pub content: String,
}

/// 限额策略；构造时自愈：若 max_chars_per_item × max_items 低于 max_total_chars，
/// 则把 max_total_chars 钳到可达上限——承诺的预算必须物理可达
#[derive(Clone, Debug)]
pub struct PackPolicy {
    pub max_items: usize,
    pub max_chars_per_item: usize,
    pub max_total_chars: usize,
    pub include_latest_tool_previews_n: usize,
    /// 为 None 时不过滤工具预览
    pub tool_allowlist: Option<Vec<String>>,
}

impl PackPolicy {
    pub fn new(
        max_items: usize,
        max_chars_per_item: usize,
        max_total_chars: usize,
        include_latest_tool_previews_n: usize,
        tool_allowlist: Option<Vec<String>>,
    ) -> Self {
        let ceiling = max_chars_per_item.saturating_mul(max_items);
        Self {
            max_items,
            max_chars_per_item,
            max_total_chars: max_total_chars.min(ceiling),
            include_latest_tool_previews_n,
            tool_allowlist,
        }
    }
}

impl Default for PackPolicy {
    fn default() -> Self {
        Self::new(8, 400, 2400, 3, None)
    }
}

/// 条目渲染策略：命名可插拔
pub trait ItemSelector: Send + Sync {
    fn name(&self) -> &str;

    /// 将条目渲染为不超过 max_chars 字符的文本
    fn render(&self, item: &PackItem, max_chars: usize) -> String;
}

/// 默认选择器：取前 N 字符
pub struct FirstCharsSelector;

impl ItemSelector for FirstCharsSelector {
    fn name(&self) -> &str {
        "first_chars"
    }

    fn render(&self, item: &PackItem, max_chars: usize) -> String {
        let text = format!("[{}] {}", item.title, item.content);
        if text.chars().count() <= max_chars {
            text
        } else {
            let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
            format!("{}...", cut)
        }
    }
}

/// 上下文包构建器
pub struct ContextPackBuilder {
    policy: PackPolicy,
    selector: Arc<dyn ItemSelector>,
}

impl ContextPackBuilder {
    pub fn new(policy: PackPolicy) -> Self {
        Self {
            policy,
            selector: Arc::new(FirstCharsSelector),
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn ItemSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn policy(&self) -> &PackPolicy {
        &self.policy
    }

    /// 组装上下文包：记忆与技能条目按给定顺序，工具预览取最近 N 条（可选白名单），
    /// 条目数与总字符数都不超过策略限额；无内容时返回 None
    pub fn build(
        &self,
        memory_items: &[PackItem],
        skill_items: &[PackItem],
        tool_previews: &[PackItem],
    ) -> Option<String> {
        let previews: Vec<&PackItem> = tool_previews
            .iter()
            .filter(|item| match (&item.source, &self.policy.tool_allowlist) {
                (PackSource::ToolPreview { tool }, Some(allow)) => allow.contains(tool),
                _ => true,
            })
            .collect();
        // 最近 N 条预览（输入按时间先后排列）
        let recent = previews
            .len()
            .saturating_sub(self.policy.include_latest_tool_previews_n);

        let mut lines: Vec<String> = Vec::new();
        let mut total_chars = 0usize;
        let candidates = memory_items
            .iter()
            .chain(skill_items.iter())
            .chain(previews[recent..].iter().copied());

        for item in candidates {
            if lines.len() >= self.policy.max_items {
                break;
            }
            let rendered = self
                .selector
                .render(item, self.policy.max_chars_per_item);
            let cost = rendered.chars().count();
            if total_chars + cost > self.policy.max_total_chars {
                break;
            }
            total_chars += cost;
            lines.push(rendered);
        }

        if lines.is_empty() {
            None
        } else {
            Some(format!("## Context pack\n{}", lines.join("\n")))
        }
    }
}
