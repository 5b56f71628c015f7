//! 引擎错误类型
//!
//! 按故障类别划分：校验失败（节点状态/能力输出不合法）、能力缺失、能力执行失败、
//! 非法状态迁移、依赖环、评审失败、调度停滞与取消。
//! 共享处理模板是唯一的异常边界：任何错误都在那里转为节点 FAILED + 布尔返回，不会逃逸到调度器。

use thiserror::Error;

use crate::capability::CapabilityRole;
use crate::node::{NodeId, NodeStatus};

/// 引擎运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum EngineError {
    /// 校验失败：节点状态/类型不满足处理器前置条件，或能力返回了畸形结果；对该节点致命，不重试
    #[error("Validation fault: {0}")]
    Validation(String),

    /// 无法解析出可调用能力（角色 × 任务类型均未注册）
    #[error("No capability for role {role} (task kind {kind})")]
    CapabilityUnavailable { role: CapabilityRole, kind: String },

    /// 能力调用失败（抛错或超时）
    #[error("Capability {name} failed: {message}")]
    CapabilityFailed { name: String, message: String },

    /// 状态迁移被 TransitionAuthority 拒绝（更深层的契约违反，而非可恢复错误）
    #[error("Transition rejected: {from} -> {to} on node {node}")]
    TransitionRejected {
        from: NodeStatus,
        to: NodeStatus,
        node: NodeId,
    },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// 子任务依赖中检测到环（显式报错，不做静默截断）
    #[error("Dependency cycle detected at node {0}")]
    DependencyCycle(NodeId),

    /// 人工评审拒绝 / 中止
    #[error("Review failed: {0}")]
    ReviewFailed(String),

    /// 系统重规划次数用尽（仅系统路径计数，用户修改不受限）
    #[error("Replan attempts exhausted ({0})")]
    ReplanExhausted(u32),

    /// 调度器停滞：无可派发节点、无在途任务、根节点却未终态
    #[error("Scheduler stalled: {0}")]
    Stalled(String),

    #[error("Cancelled")]
    Cancelled,
}
