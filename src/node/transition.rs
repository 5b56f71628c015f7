//! 状态迁移裁定
//!
//! TransitionAuthority 持有物理迁移表：不在表内的迁移一律拒绝并返回错误，绝不静默忽略。
//! 每次成功迁移更新 updated_at、打日志并推送 NodeStatusChanged 事件。

use tokio::sync::mpsc;

use crate::engine::EngineEvent;
use crate::error::EngineError;
use crate::node::{NodeStatus, TaskNode};

/// 迁移裁定者：校验并应用状态迁移
pub struct TransitionAuthority {
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl TransitionAuthority {
    pub fn new(events: Option<mpsc::UnboundedSender<EngineEvent>>) -> Self {
        Self { events }
    }

    /// 迁移表。FAILED/CANCELLED 可从任意非终态进入：处理模板的统一异常边界
    /// 必须能在认领前后任何一步把节点置为失败或取消。
    pub fn allows(from: NodeStatus, to: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (from, to),
            (Pending, Ready | Failed | Cancelled)
                | (Ready, Running | Failed | Cancelled)
                | (Running, Done | Failed | PlanDone | NeedsReplan | Ready | Cancelled)
                | (PlanDone, Aggregating | Failed | Cancelled)
                | (Aggregating, Done | Failed | NeedsReplan | Cancelled)
                | (NeedsReplan, Running | Failed | Cancelled)
        )
    }

    /// 应用一次迁移；非法迁移返回 TransitionRejected
    pub fn apply(
        &self,
        node: &mut TaskNode,
        to: NodeStatus,
        reason: &str,
    ) -> Result<(), EngineError> {
        let from = node.status;
        if !Self::allows(from, to) {
            return Err(EngineError::TransitionRejected {
                from,
                to,
                node: node.id.clone(),
            });
        }
        node.status = to;
        node.updated_at = chrono::Utc::now().timestamp_millis();
        tracing::debug!(node = %node.id, %from, %to, reason, "transition");
        if let Some(tx) = &self.events {
            let _ = tx.send(EngineEvent::NodeStatusChanged {
                node_id: node.id.clone(),
                from,
                to,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }
}
