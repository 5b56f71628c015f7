//! 知识库
//!
//! 记录节点的最新快照，供上下文装配检索。upsert 按节点 id 幂等：
//! 同一节点状态重复写入只保留一条记录，不产生重复历史。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::node::{NodeId, NodeResult, NodeStatus, TaskNode};

/// 一条知识记录：节点的结果视图
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeRecord {
    pub node_id: NodeId,
    pub goal: String,
    pub status: NodeStatus,
    pub result: Option<NodeResult>,
    pub error: Option<String>,
    /// 最近写入时间（毫秒时间戳）
    pub recorded_at: i64,
}

impl KnowledgeRecord {
    fn from_node(node: &TaskNode) -> Self {
        Self {
            node_id: node.id.clone(),
            goal: node.goal.clone(),
            status: node.status,
            result: node.result.clone(),
            error: node.error.clone(),
            recorded_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 知识库 trait
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// 写入或覆盖节点快照（幂等）
    async fn upsert(&self, node: &TaskNode);

    async fn get(&self, node_id: &NodeId) -> Option<KnowledgeRecord>;

    async fn len(&self) -> usize;
}

/// 内存实现：按节点 id 存储
#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    records: RwLock<HashMap<NodeId, KnowledgeRecord>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn upsert(&self, node: &TaskNode) {
        let mut records = self.records.write().await;
        records.insert(node.id.clone(), KnowledgeRecord::from_node(node));
    }

    async fn get(&self, node_id: &NodeId) -> Option<KnowledgeRecord> {
        self.records.read().await.get(node_id).cloned()
    }

    async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}
