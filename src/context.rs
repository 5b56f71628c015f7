//! 上下文装配
//!
//! 为能力调用构建结构化输入：祖先目标链 + 依赖结果条目。
//! 聚合上下文先做冗余消除（见 graph::closure），再并入本节点自身的
//! 横向依赖条目；失败子节点贡献错误文本而非占位符。

use serde::Serialize;

use crate::error::EngineError;
use crate::graph::{closure, TaskGraph};
use crate::knowledge::KnowledgeStore;
use crate::node::{NodeId, NodeStatus, TaskNode};

/// 上下文种类（对应四种能力调用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Atomization,
    Planning,
    Execution,
    Aggregation,
}

/// 条目的内容标记：来源节点完成还是失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Done,
    Failed,
}

/// 一条上下文条目：来源节点 id、目标与内容
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    pub source_id: NodeId,
    pub goal: String,
    pub content_type: ContentType,
    pub content: serde_json::Value,
}

/// 装配完成的结构化输入
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    /// 序列化时跳过：缓存键只看目标与内容，同一目标跨节点/跨运行可命中
    #[serde(skip_serializing)]
    pub node_id: NodeId,
    pub kind: ContextKind,
    pub goal: String,
    pub layer: u32,
    /// 根在前的祖先目标链
    pub ancestor_goals: Vec<String>,
    pub items: Vec<ContextItem>,
}

/// 上下文装配器
#[derive(Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn new() -> Self {
        Self
    }

    /// 构建一次能力调用的输入。调用方需持有图的读权（快照语义）。
    pub async fn build(
        &self,
        node: &TaskNode,
        kind: ContextKind,
        store: &dyn KnowledgeStore,
        graph: &TaskGraph,
    ) -> Result<AssembledContext, EngineError> {
        let mut items = match kind {
            ContextKind::Aggregation => self.aggregation_items(node, store, graph).await?,
            _ => Vec::new(),
        };
        // 横向上下文：本节点声明的依赖结果（聚合时并入子图条目之后）
        items.extend(self.dependency_items(node, store, graph).await?);

        Ok(AssembledContext {
            node_id: node.id.clone(),
            kind,
            goal: node.goal.clone(),
            layer: node.layer,
            ancestor_goals: graph.ancestor_goals(&node.id),
            items,
        })
    }

    /// 节点自身依赖的结果条目（仅终态依赖可见）
    async fn dependency_items(
        &self,
        node: &TaskNode,
        store: &dyn KnowledgeStore,
        graph: &TaskGraph,
    ) -> Result<Vec<ContextItem>, EngineError> {
        let mut items = Vec::new();
        for dep_id in graph.resolve_dependencies(&node.id)? {
            let Some(dep) = graph.get(&dep_id) else { continue };
            if !dep.is_terminal() {
                continue;
            }
            items.push(self.item_for(dep, store).await);
        }
        Ok(items)
    }

    /// 聚合条目：只见终态子节点，经冗余消除
    async fn aggregation_items(
        &self,
        node: &TaskNode,
        store: &dyn KnowledgeStore,
        graph: &TaskGraph,
    ) -> Result<Vec<ContextItem>, EngineError> {
        let included = closure::eliminate_redundancy(graph, node)?;
        let mut items = Vec::with_capacity(included.len());
        for child_id in included {
            let child = graph.node(&child_id)?;
            items.push(self.item_for(child, store).await);
        }
        Ok(items)
    }

    /// 单个终态节点转为条目：完成节点取结果内容（不截断），
    /// 失败节点贡献错误文本
    async fn item_for(&self, node: &TaskNode, store: &dyn KnowledgeStore) -> ContextItem {
        let record = store.get(&node.id).await;
        match node.status {
            NodeStatus::Done => {
                let content = record
                    .as_ref()
                    .and_then(|r| r.result.as_ref())
                    .or(node.result.as_ref())
                    .map(|r| r.value.clone())
                    .unwrap_or(serde_json::Value::Null);
                ContextItem {
                    source_id: node.id.clone(),
                    goal: node.goal.clone(),
                    content_type: ContentType::Done,
                    content,
                }
            }
            _ => {
                let error = record
                    .as_ref()
                    .and_then(|r| r.error.clone())
                    .or_else(|| node.error.clone())
                    .unwrap_or_else(|| format!("node ended {}", node.status));
                ContextItem {
                    source_id: node.id.clone(),
                    goal: node.goal.clone(),
                    content_type: ContentType::Failed,
                    content: serde_json::Value::String(error),
                }
            }
        }
    }
}
