//! 能力注册表
//!
//! 所有能力实现 Capability trait（name / role / invoke），由 CapabilityRegistry
//! 按（角色 × 任务种类）注册与解析。派发表在注册时校验（角色不符、重复键即报错），
//! 而非调用时；注册表是显式对象，随 HandlerContext 注入，无进程级全局状态。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityInput, CapabilityOutput};
use crate::error::EngineError;
use crate::node::{TaskKind, TaskNode};
use crate::trace::TraceSink;

/// 能力角色：五种可插拔职责
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityRole {
    /// 判定节点是否可直接执行
    Atomizer,
    /// 产出子任务序列
    Planner,
    /// 执行叶子任务
    Executor,
    /// 合成子节点结果
    Aggregator,
    /// 按指令修订既有计划
    PlanModifier,
}

impl fmt::Display for CapabilityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Atomizer => "atomizer",
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Aggregator => "aggregator",
            Self::PlanModifier => "plan_modifier",
        };
        write!(f, "{s}")
    }
}

/// 能力 trait：接受结构化输入，返回结构化输出或失败
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn role(&self) -> CapabilityRole;

    async fn invoke(
        &self,
        node: &TaskNode,
        input: &CapabilityInput,
        trace: &dyn TraceSink,
    ) -> Result<CapabilityOutput, String>;
}

/// 能力注册表：按 (role, Option<TaskKind>) 存储；None 为角色级兜底项，
/// 精确的 (role, kind) 条目优先于兜底
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: HashMap<(CapabilityRole, Option<TaskKind>), Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一条派发项；角色与实现不符或键重复立即报错
    pub fn register(
        &mut self,
        role: CapabilityRole,
        kind: Option<TaskKind>,
        capability: Arc<dyn Capability>,
    ) -> Result<(), EngineError> {
        if capability.role() != role {
            return Err(EngineError::Validation(format!(
                "capability {} declares role {} but was registered as {}",
                capability.name(),
                capability.role(),
                role
            )));
        }
        let key = (role, kind);
        if self.entries.contains_key(&key) {
            return Err(EngineError::Validation(format!(
                "duplicate capability registration for role {} (kind {:?})",
                role,
                key.1.as_ref().map(|k| k.as_str())
            )));
        }
        self.entries.insert(key, capability);
        Ok(())
    }

    /// 选择处理该节点的能力名（不实际解析）
    pub fn select(&self, node: &TaskNode, role: CapabilityRole) -> Option<&str> {
        self.lookup(node, role).map(|c| c.name())
    }

    /// 解析出可调用能力：先查 (role, task_kind)，再落到角色兜底
    pub fn resolve(&self, node: &TaskNode, role: CapabilityRole) -> Option<Arc<dyn Capability>> {
        self.lookup(node, role).cloned()
    }

    fn lookup(&self, node: &TaskNode, role: CapabilityRole) -> Option<&Arc<dyn Capability>> {
        self.entries
            .get(&(role, Some(node.task_kind.clone())))
            .or_else(|| self.entries.get(&(role, None)))
    }
}
