//! 计划模型
//!
//! 依赖校验过的步骤列表：TodoItem 以 1 基 position 标识，依赖关系必须无环
//! （每次计划修订校验一次）。生命周期：任务开始时由策略创建，执行中由所属
//! 会话逐步变更状态，经外部状态协作方持久化，终态（完成或放弃）后退役。

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 步骤状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// 单个计划步骤；dependencies 为必须先完成的步骤 position 集合
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    /// 1 基序号
    pub position: usize,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    #[serde(default)]
    pub dependencies: BTreeSet<usize>,
    pub status: TodoStatus,
}

impl TodoItem {
    pub fn new(position: usize, description: impl Into<String>) -> Self {
        Self {
            position,
            description: description.into(),
            acceptance_criteria: String::new(),
            dependencies: BTreeSet::new(),
            status: TodoStatus::Pending,
        }
    }
}

/// 计划：任务描述 + 有序步骤 + 未决问题与备注
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoList {
    pub id: String,
    pub mission: String,
    pub items: Vec<TodoItem>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl TodoList {
    pub fn new(mission: impl Into<String>, items: Vec<TodoItem>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mission: mission.into(),
            items,
            open_questions: Vec::new(),
            notes: String::new(),
        }
    }

    pub fn get_mut(&mut self, position: usize) -> Option<&mut TodoItem> {
        self.items.iter_mut().find(|i| i.position == position)
    }

    /// 指定步骤的所有依赖是否都已 COMPLETED
    pub fn dependencies_met(&self, position: usize) -> bool {
        let Some(item) = self.items.iter().find(|i| i.position == position) else {
            return false;
        };
        item.dependencies.iter().all(|dep| {
            self.items
                .iter()
                .any(|i| i.position == *dep && i.status == TodoStatus::Completed)
        })
    }
}

/// 依赖无环校验：递归栈 DFS 检测环；数十个步骤应远低于 100ms
pub fn validate_dependencies(plan: &TodoList) -> bool {
    let graph: HashMap<usize, &BTreeSet<usize>> = plan
        .items
        .iter()
        .map(|i| (i.position, &i.dependencies))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit(
        node: usize,
        graph: &HashMap<usize, &BTreeSet<usize>>,
        marks: &mut HashMap<usize, Mark>,
    ) -> bool {
        match marks.get(&node).copied().unwrap_or(Mark::Unvisited) {
            Mark::Done => return true,
            Mark::OnStack => return false,
            Mark::Unvisited => {}
        }
        marks.insert(node, Mark::OnStack);
        if let Some(deps) = graph.get(&node) {
            for dep in deps.iter() {
                // 指向未知步骤的依赖视为非法
                if !graph.contains_key(dep) {
                    return false;
                }
                if !visit(*dep, graph, marks) {
                    return false;
                }
            }
        }
        marks.insert(node, Mark::Done);
        true
    }

    let mut marks = HashMap::new();
    plan.items
        .iter()
        .all(|i| visit(i.position, &graph, &mut marks))
}

/// 计划是否完成：所有步骤均为 COMPLETED 或 SKIPPED
pub fn is_plan_complete(plan: &TodoList) -> bool {
    plan.items
        .iter()
        .all(|i| matches!(i.status, TodoStatus::Completed | TodoStatus::Skipped))
}

/// 提前完成策略：respond 时仍有 PENDING 步骤，全部转为 SKIPPED 再持久化，
/// 返回被跳过的步骤数
pub fn skip_remaining_pending(plan: &mut TodoList) -> usize {
    let mut skipped = 0;
    for item in &mut plan.items {
        if item.status == TodoStatus::Pending {
            item.status = TodoStatus::Skipped;
            skipped += 1;
        }
    }
    skipped
}
