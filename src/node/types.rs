//! 任务节点类型定义
//!
//! 定义 TaskNode（九种状态、PLAN/EXECUTE 类型、开放的任务种类标签）、
//! 节点结果及形状标签、Planner 产出的 PlanOutput/PlannedTask，以及重规划触发器。

use std::fmt;

use serde::{Deserialize, Serialize};

pub type NodeId = String;
pub type SubGraphId = String;

/// 节点状态（状态机的九个状态，迁移表见 transition.rs）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// 已创建，等待依赖终态后晋升
    Pending,
    /// 依赖已满足，可被派发
    Ready,
    /// 正在被某个处理器处理（同一时刻单写者）
    Running,
    /// 计划已被采纳，子图已实例化（零个子节点也算）
    PlanDone,
    /// 子节点全部终态，正在聚合
    Aggregating,
    /// 等待重规划（用户修改请求或系统失败恢复）
    NeedsReplan,
    /// 已完成
    Done,
    /// 执行失败
    Failed,
    /// 已取消
    Cancelled,
}

impl NodeStatus {
    /// 是否终态（终态节点不再接受任何迁移）
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::PlanDone => "plan_done",
            Self::Aggregating => "aggregating",
            Self::NeedsReplan => "needs_replan",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// 节点类型：继续分解还是直接执行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Plan,
    Execute,
}

/// 任务种类：开放的标签（SEARCH / WRITE / THINK 等），统一大写归一
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKind(String);

impl TaskKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into().to_uppercase())
    }

    pub fn search() -> Self {
        Self::new("SEARCH")
    }

    pub fn write() -> Self {
        Self::new("WRITE")
    }

    pub fn think() -> Self {
        Self::new("THINK")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 执行结果的形状标签（仅用于展示摘要，不参与控制流）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Empty,
    Text,
    List,
    Object,
    Scalar,
}

/// 节点的结构化结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub value: serde_json::Value,
    pub kind: OutputKind,
    /// 人类可读摘要（截断预览）
    pub summary: String,
}

/// 摘要预览最大字符数
const SUMMARY_PREVIEW_CHARS: usize = 160;

impl NodeResult {
    /// 按值的形状分类并生成摘要；分类只影响标签，永远不改变控制流
    pub fn classify(value: serde_json::Value) -> Self {
        let kind = match &value {
            serde_json::Value::Null => OutputKind::Empty,
            serde_json::Value::String(s) if s.trim().is_empty() => OutputKind::Empty,
            serde_json::Value::String(_) => OutputKind::Text,
            serde_json::Value::Array(a) if a.is_empty() => OutputKind::Empty,
            serde_json::Value::Array(_) => OutputKind::List,
            serde_json::Value::Object(o) if o.is_empty() => OutputKind::Empty,
            serde_json::Value::Object(_) => OutputKind::Object,
            serde_json::Value::Number(_) | serde_json::Value::Bool(_) => OutputKind::Scalar,
        };
        let rendered = match &value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let summary = if rendered.chars().count() > SUMMARY_PREVIEW_CHARS {
            format!(
                "{}...",
                rendered.chars().take(SUMMARY_PREVIEW_CHARS).collect::<String>()
            )
        } else {
            rendered
        };
        Self { value, kind, summary }
    }
}

/// 计划中的一条子任务（depends_on_indices 引用同一序列中更早的条目）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub goal: String,
    pub task_kind: TaskKind,
    pub node_type: NodeType,
    #[serde(default)]
    pub depends_on_indices: Vec<usize>,
}

/// Planner 的产出：有序的子任务序列；空序列是合法且有意义的结果（无需继续分解），不是错误
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanOutput {
    pub tasks: Vec<PlannedTask>,
}

impl PlanOutput {
    /// 校验依赖索引：只能引用同一序列中更早的条目（自引用/前向/越界均为校验失败）
    pub fn validate(&self) -> Result<(), String> {
        for (i, task) in self.tasks.iter().enumerate() {
            for &dep in &task.depends_on_indices {
                if dep >= i {
                    return Err(format!(
                        "task {} ({}) depends on index {} which is not an earlier entry",
                        i, task.goal, dep
                    ));
                }
            }
        }
        Ok(())
    }
}

/// 重规划触发器：按用途打标签，非法组合不可表示
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplanTrigger {
    /// 评审方要求修改计划（不计入系统尝试次数、不受上限约束）
    UserModification {
        original_plan: Option<PlanOutput>,
        instructions: String,
    },
    /// 系统失败恢复（受 max_replan_attempts 约束）
    SystemRetry {
        prior_error: Option<String>,
        reason: String,
    },
}

/// 任务节点：分解出的一个工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: NodeId,
    /// 目标描述
    pub goal: String,
    pub status: NodeStatus,
    pub node_type: NodeType,
    pub task_kind: TaskKind,
    /// 分解深度，根节点为 0
    pub layer: u32,
    /// 父节点（根为 None）
    pub parent_id: Option<NodeId>,
    /// 本节点成功规划后创建的子图（零个子节点也会创建空子图）
    pub sub_graph_id: Option<SubGraphId>,
    /// 计划序号 -> 实际子节点 id 的有序映射
    pub planned_child_ids: Vec<NodeId>,
    /// 规划时声明的依赖序号（相对父节点的计划顺序解析）
    pub depends_on_indices: Vec<usize>,
    pub result: Option<NodeResult>,
    pub error: Option<String>,
    /// 系统发起的重规划次数（用户修改不计入）
    pub replan_attempts: u32,
    /// 待处理的重规划触发器，处理完成后清除
    pub replan: Option<ReplanTrigger>,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    pub updated_at: i64,
}

impl TaskNode {
    /// 创建根节点（layer 0，等待调度器晋升）
    pub fn new_root(goal: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("node_{}", uuid::Uuid::new_v4()),
            goal: goal.into(),
            status: NodeStatus::Pending,
            node_type: NodeType::Plan,
            task_kind: TaskKind::think(),
            layer: 0,
            parent_id: None,
            sub_graph_id: None,
            planned_child_ids: Vec::new(),
            depends_on_indices: Vec::new(),
            result: None,
            error: None,
            replan_attempts: 0,
            replan: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 由已采纳的计划条目实例化子节点；node_type 只是规划时的提示，派发时由 Ready 处理器最终裁定
    pub fn new_child(parent: &TaskNode, task: &PlannedTask) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("node_{}", uuid::Uuid::new_v4()),
            goal: task.goal.clone(),
            status: NodeStatus::Pending,
            node_type: task.node_type,
            task_kind: task.task_kind.clone(),
            layer: parent.layer + 1,
            parent_id: Some(parent.id.clone()),
            sub_graph_id: None,
            planned_child_ids: Vec::new(),
            depends_on_indices: task.depends_on_indices.clone(),
            result: None,
            error: None,
            replan_attempts: 0,
            replan: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
