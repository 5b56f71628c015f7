//! 人工评审门
//!
//! 可选的同步审批检查点：计划、修订计划与执行前各有一个入口，
//! 裁决为批准 / 要求修改 / 拒绝 / 中止。超时策略由引擎在调用侧统一施加
//! （见 HandlerContext），门实现只负责给出裁决。
//! ChannelReviewGate 用 mpsc 请求 + oneshot 回执对接外部评审方。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::context::AssembledContext;
use crate::node::{NodeId, PlanOutput, TaskNode};

/// 评审裁决
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    /// 要求修改：不使节点失败，转入重规划
    RequestModification { instructions: String },
    Rejected { reason: String },
    Aborted,
}

/// 评审门 trait
#[async_trait]
pub trait ReviewGate: Send + Sync {
    async fn review_plan(&self, node: &TaskNode, plan: &PlanOutput) -> ReviewDecision;

    async fn review_modified_plan(&self, node: &TaskNode, plan: &PlanOutput) -> ReviewDecision;

    async fn review_execution(&self, node: &TaskNode, context: &AssembledContext)
        -> ReviewDecision;
}

/// 全部自动批准（未配置人工评审时的默认行为）
#[derive(Default)]
pub struct AutoApproveGate;

#[async_trait]
impl ReviewGate for AutoApproveGate {
    async fn review_plan(&self, _node: &TaskNode, _plan: &PlanOutput) -> ReviewDecision {
        ReviewDecision::Approved
    }

    async fn review_modified_plan(&self, _node: &TaskNode, _plan: &PlanOutput) -> ReviewDecision {
        ReviewDecision::Approved
    }

    async fn review_execution(
        &self,
        _node: &TaskNode,
        _context: &AssembledContext,
    ) -> ReviewDecision {
        ReviewDecision::Approved
    }
}

/// 评审阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStage {
    Plan,
    ModifiedPlan,
    Execution,
}

/// 发往外部评审方的请求
pub struct ReviewRequest {
    pub node_id: NodeId,
    pub goal: String,
    pub stage: ReviewStage,
    /// 计划类评审携带计划内容
    pub plan: Option<PlanOutput>,
    pub reply: oneshot::Sender<ReviewDecision>,
}

/// 基于通道的评审门：请求推给外部消费者，等待 oneshot 回执；
/// 回执端被丢弃视为中止
pub struct ChannelReviewGate {
    request_tx: mpsc::UnboundedSender<ReviewRequest>,
}

impl ChannelReviewGate {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReviewRequest>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        (Self { request_tx }, request_rx)
    }

    async fn ask(
        &self,
        node: &TaskNode,
        stage: ReviewStage,
        plan: Option<PlanOutput>,
    ) -> ReviewDecision {
        let (reply, wait) = oneshot::channel();
        let request = ReviewRequest {
            node_id: node.id.clone(),
            goal: node.goal.clone(),
            stage,
            plan,
            reply,
        };
        if self.request_tx.send(request).is_err() {
            return ReviewDecision::Aborted;
        }
        wait.await.unwrap_or(ReviewDecision::Aborted)
    }
}

#[async_trait]
impl ReviewGate for ChannelReviewGate {
    async fn review_plan(&self, node: &TaskNode, plan: &PlanOutput) -> ReviewDecision {
        self.ask(node, ReviewStage::Plan, Some(plan.clone())).await
    }

    async fn review_modified_plan(&self, node: &TaskNode, plan: &PlanOutput) -> ReviewDecision {
        self.ask(node, ReviewStage::ModifiedPlan, Some(plan.clone())).await
    }

    async fn review_execution(
        &self,
        node: &TaskNode,
        _context: &AssembledContext,
    ) -> ReviewDecision {
        self.ask(node, ReviewStage::Execution, None).await
    }
}
