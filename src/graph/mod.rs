//! 任务图
//!
//! 节点森林按子图分组：一次分解产生一个子图。本结构由调用方以 Arc<RwLock<TaskGraph>>
//! 共享，所有结构性修改（实例化子节点、整体替换子图）都在写锁内完成，
//! 并发读者不会看到半更新的父子链接。

pub mod closure;

use std::collections::HashMap;

use crate::error::EngineError;
use crate::node::{NodeId, NodeStatus, PlanOutput, SubGraphId, TaskNode};

/// 任务图：节点表 + 子图表 + 创建顺序（调度的 FIFO 依据）
pub struct TaskGraph {
    nodes: HashMap<NodeId, TaskNode>,
    /// 子图 id -> 按计划顺序排列的子节点 id
    sub_graphs: HashMap<SubGraphId, Vec<NodeId>>,
    root_id: NodeId,
    creation_order: Vec<NodeId>,
}

impl TaskGraph {
    pub fn new(root: TaskNode) -> Self {
        let root_id = root.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);
        Self {
            nodes,
            sub_graphs: HashMap::new(),
            root_id: root_id.clone(),
            creation_order: vec![root_id],
        }
    }

    pub fn root_id(&self) -> &NodeId {
        &self.root_id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 节点创建顺序（调度器按此顺序扫描，FIFO 派发策略）
    pub fn creation_order(&self) -> &[NodeId] {
        &self.creation_order
    }

    pub fn get(&self, id: &NodeId) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    pub fn node(&self, id: &NodeId) -> Result<&TaskNode, EngineError> {
        self.nodes
            .get(id)
            .ok_or_else(|| EngineError::NodeNotFound(id.clone()))
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Result<&mut TaskNode, EngineError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| EngineError::NodeNotFound(id.clone()))
    }

    /// 子图内的节点，按计划顺序
    pub fn sub_graph_nodes(&self, sub_graph_id: &SubGraphId) -> Vec<&TaskNode> {
        self.sub_graphs
            .get(sub_graph_id)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    /// 祖先目标链（根在前，不含自身），供上下文装配
    pub fn ancestor_goals(&self, id: &NodeId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = self.nodes.get(id).and_then(|n| n.parent_id.clone());
        while let Some(pid) = cursor {
            if let Some(parent) = self.nodes.get(&pid) {
                chain.push(parent.goal.clone());
                cursor = parent.parent_id.clone();
            } else {
                break;
            }
        }
        chain.reverse();
        chain
    }

    /// 把节点声明的依赖序号解析为实际子节点 id（通过父节点的 planned_child_ids）
    pub fn resolve_dependencies(&self, id: &NodeId) -> Result<Vec<NodeId>, EngineError> {
        let node = self.node(id)?;
        let Some(parent_id) = &node.parent_id else {
            return Ok(Vec::new());
        };
        let parent = self.node(parent_id)?;
        node.depends_on_indices
            .iter()
            .map(|&i| {
                parent.planned_child_ids.get(i).cloned().ok_or_else(|| {
                    EngineError::Validation(format!(
                        "node {id} declares dependency index {i} outside the parent's plan"
                    ))
                })
            })
            .collect()
    }

    /// 节点的全部依赖是否已终态（无依赖视为满足）
    pub fn dependencies_terminal(&self, id: &NodeId) -> Result<bool, EngineError> {
        let deps = self.resolve_dependencies(id)?;
        Ok(deps
            .iter()
            .all(|d| self.get(d).map(|n| n.is_terminal()).unwrap_or(false)))
    }

    /// 子图内子节点是否全部终态；空子图平凡成立，尚未规划返回 false
    pub fn children_terminal(&self, id: &NodeId) -> bool {
        let Some(node) = self.get(id) else { return false };
        let Some(sg) = &node.sub_graph_id else { return false };
        self.sub_graph_nodes(sg).iter().all(|c| c.is_terminal())
    }

    /// 可晋升的 Pending 节点（依赖全部终态），按创建顺序
    pub fn promotable(&self) -> Vec<NodeId> {
        self.creation_order
            .iter()
            .filter(|id| {
                self.get(id)
                    .map(|n| n.status == NodeStatus::Pending)
                    .unwrap_or(false)
                    && self.dependencies_terminal(id).unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// 采纳一份计划：丢弃旧子图（连同其后代），创建新子图并实例化子节点，
    /// 在父节点上记录 planned_child_ids 与 sub_graph_id。空计划创建空子图，
    /// 聚合因此始终有明确的操作对象。整个替换在一次调用内完成。
    pub fn adopt_plan(
        &mut self,
        parent_id: &NodeId,
        plan: &PlanOutput,
    ) -> Result<(SubGraphId, Vec<NodeId>), EngineError> {
        let old = self.node(parent_id)?.sub_graph_id.clone();
        if let Some(sg) = old {
            self.discard_sub_graph(&sg);
        }

        let parent = self.node(parent_id)?.clone();
        let sub_graph_id = format!("sg_{}", uuid::Uuid::new_v4());
        let mut child_ids = Vec::with_capacity(plan.tasks.len());
        for task in &plan.tasks {
            let child = TaskNode::new_child(&parent, task);
            child_ids.push(child.id.clone());
            self.creation_order.push(child.id.clone());
            self.nodes.insert(child.id.clone(), child);
        }
        self.sub_graphs.insert(sub_graph_id.clone(), child_ids.clone());

        let parent = self.node_mut(parent_id)?;
        parent.sub_graph_id = Some(sub_graph_id.clone());
        parent.planned_child_ids = child_ids.clone();
        Ok((sub_graph_id, child_ids))
    }

    /// 整体丢弃一个子图及其全部后代子图
    fn discard_sub_graph(&mut self, sub_graph_id: &SubGraphId) {
        if let Some(children) = self.sub_graphs.remove(sub_graph_id) {
            for id in children {
                if let Some(node) = self.nodes.remove(&id) {
                    if let Some(nested) = node.sub_graph_id {
                        self.discard_sub_graph(&nested);
                    }
                }
                self.creation_order.retain(|c| c != &id);
            }
        }
    }
}
