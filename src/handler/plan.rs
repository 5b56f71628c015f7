//! 规划处理器
//!
//! 装配规划上下文、调用 Planner、校验计划形状与依赖索引，走可选的计划评审，
//! 批准后实例化子节点并迁入 PLAN_DONE。空计划直接 PLAN_DONE（仍创建空子图，
//! 聚合因此有明确操作对象，不走评审——没有可批的内容）。
//! 要求修改不使节点失败，转入 NEEDS_REPLAN 并暂存原计划与修改指令。

use async_trait::async_trait;

use crate::capability::{CapabilityInput, CapabilityOutput, CapabilityRole};
use crate::context::ContextKind;
use crate::engine::EngineEvent;
use crate::error::EngineError;
use crate::handler::{HandlerContext, HandlerOutcome, NodeHandler};
use crate::node::{NodeId, NodeStatus, NodeType, PlanOutput, ReplanTrigger, TaskNode};
use crate::review::ReviewDecision;

#[derive(Default)]
pub struct PlanHandler;

impl PlanHandler {
    pub fn new() -> Self {
        Self
    }
}

/// 能力输出必须暴露子任务序列；缺少该形状是致命错误，不是空计划
pub(crate) fn expect_plan(output: CapabilityOutput) -> Result<PlanOutput, EngineError> {
    match output {
        CapabilityOutput::Plan(plan) => Ok(plan),
        other => Err(EngineError::Validation(format!(
            "planner returned a non-plan shape: {:?}",
            other
        ))),
    }
}

/// 采纳计划：整体替换子图、清除重规划触发器、迁入 PLAN_DONE
pub(crate) async fn adopt_plan(
    ctx: &HandlerContext,
    node_id: &NodeId,
    plan: &PlanOutput,
) -> Result<usize, EngineError> {
    let children = {
        let mut graph = ctx.graph.write().await;
        let (sub_graph_id, children) = graph.adopt_plan(node_id, plan)?;
        let node = graph.node_mut(node_id)?;
        node.replan = None;
        ctx.authority.apply(node, NodeStatus::PlanDone, "plan accepted")?;
        tracing::info!(node = %node_id, sub_graph = %sub_graph_id, children = children.len(), "plan adopted");
        children
    };
    ctx.emit(EngineEvent::PlanAccepted {
        node_id: node_id.clone(),
        children: children.len(),
    });
    Ok(children.len())
}

/// 统一的评审裁决处理（规划与重规划共用）
pub(crate) async fn settle_review(
    ctx: &HandlerContext,
    node_id: &NodeId,
    plan: PlanOutput,
    decision: ReviewDecision,
) -> Result<HandlerOutcome, EngineError> {
    match decision {
        ReviewDecision::Approved => {
            adopt_plan(ctx, node_id, &plan).await?;
            Ok(HandlerOutcome::Applied)
        }
        ReviewDecision::RequestModification { instructions } => {
            let mut graph = ctx.graph.write().await;
            let node = graph.node_mut(node_id)?;
            node.replan = Some(ReplanTrigger::UserModification {
                original_plan: Some(plan),
                instructions,
            });
            ctx.authority
                .apply(node, NodeStatus::NeedsReplan, "modification requested")?;
            Ok(HandlerOutcome::Applied)
        }
        ReviewDecision::Rejected { reason } => Err(EngineError::ReviewFailed(format!(
            "plan rejected: {reason}"
        ))),
        ReviewDecision::Aborted => Err(EngineError::ReviewFailed("plan review aborted".into())),
    }
}

#[async_trait]
impl NodeHandler for PlanHandler {
    fn name(&self) -> &'static str {
        "plan"
    }

    fn validate(&self, node: &TaskNode) -> Result<(), EngineError> {
        if node.status != NodeStatus::Ready || node.node_type != NodeType::Plan {
            return Err(EngineError::Validation(format!(
                "plan handler expects a READY plan node, got {} {:?} ({})",
                node.status, node.node_type, node.id
            )));
        }
        Ok(())
    }

    async fn process(
        &self,
        ctx: &HandlerContext,
        node_id: &NodeId,
    ) -> Result<HandlerOutcome, EngineError> {
        let node = ctx.node_snapshot(node_id).await?;
        let context = ctx.assemble(&node, ContextKind::Planning).await?;
        let output = ctx
            .invoke_capability(
                &node,
                CapabilityRole::Planner,
                &CapabilityInput::Plan { context, replan: None },
            )
            .await?;
        let plan = expect_plan(output)?;

        if plan.tasks.is_empty() {
            // 空计划：无需继续分解，也没有可评审的内容
            adopt_plan(ctx, node_id, &plan).await?;
            return Ok(HandlerOutcome::Applied);
        }
        plan.validate().map_err(EngineError::Validation)?;

        let decision = if ctx.config.review.plans {
            ctx.review_plan(&node, &plan, false).await?
        } else {
            ReviewDecision::Approved
        };
        settle_review(ctx, node_id, plan, decision).await
    }
}
