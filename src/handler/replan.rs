//! 重规划处理器
//!
//! 两条路径按序尝试。修改路径：PlanModifier 可用且触发器携带原计划或指令时使用，
//! 不受次数上限约束、不递增计数；全量重规划路径（兜底）：仅系统路径受
//! max_replan_attempts 约束，调用前先查后增。两条路径汇入与全新规划相同的
//! 评审与子图替换逻辑（旧子节点整体丢弃，成功后重回 PLAN_DONE）。
//! 重规划得到空计划视为「一无所获」，节点失败。

use async_trait::async_trait;

use crate::capability::{CapabilityInput, CapabilityRole, ReplanDirective};
use crate::context::ContextKind;
use crate::error::EngineError;
use crate::handler::plan::{expect_plan, settle_review};
use crate::handler::{HandlerContext, HandlerOutcome, NodeHandler};
use crate::node::{NodeId, NodeStatus, PlanOutput, ReplanTrigger, TaskNode};
use crate::review::ReviewDecision;

#[derive(Default)]
pub struct ReplanHandler;

impl ReplanHandler {
    pub fn new() -> Self {
        Self
    }

    /// 修改路径：携带 {原计划, 指令} 调用 PlanModifier
    async fn modification_path(
        &self,
        ctx: &HandlerContext,
        node: &TaskNode,
        original_plan: Option<PlanOutput>,
        instructions: String,
    ) -> Result<PlanOutput, EngineError> {
        let output = ctx
            .invoke_capability(node, CapabilityRole::PlanModifier, &CapabilityInput::ModifyPlan {
                original_plan,
                instructions,
            })
            .await?;
        expect_plan(output)
    }

    /// 全量重规划路径：携带 {既往错误, 原因} 调用 Planner。
    /// 仅系统发起（counted）时先查后增尝试计数；用户修改落到本路径时
    /// 不查上限也不动计数器。
    async fn full_replan_path(
        &self,
        ctx: &HandlerContext,
        node_id: &NodeId,
        prior_error: Option<String>,
        reason: String,
        counted: bool,
    ) -> Result<PlanOutput, EngineError> {
        let max = ctx.config.engine.max_replan_attempts;
        let attempt = if counted {
            let mut graph = ctx.graph.write().await;
            let node = graph.node_mut(node_id)?;
            if node.replan_attempts >= max {
                return Err(EngineError::ReplanExhausted(node.replan_attempts));
            }
            node.replan_attempts += 1;
            node.replan_attempts
        } else {
            ctx.node_snapshot(node_id).await?.replan_attempts
        };
        tracing::info!(node = %node_id, attempt, max, counted, reason = %reason, "full replan");

        let node = ctx.node_snapshot(node_id).await?;
        let context = ctx.assemble(&node, ContextKind::Planning).await?;
        let output = ctx
            .invoke_capability(&node, CapabilityRole::Planner, &CapabilityInput::Plan {
                context,
                replan: Some(ReplanDirective {
                    prior_error,
                    reason,
                    attempt,
                }),
            })
            .await?;
        expect_plan(output)
    }
}

#[async_trait]
impl NodeHandler for ReplanHandler {
    fn name(&self) -> &'static str {
        "replan"
    }

    fn validate(&self, node: &TaskNode) -> Result<(), EngineError> {
        if node.status != NodeStatus::NeedsReplan {
            return Err(EngineError::Validation(format!(
                "replan handler expects a NEEDS_REPLAN node, got {} ({})",
                node.status, node.id
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
        let trigger = node.replan.clone();
        let modifier_available = ctx
            .registry
            .select(&node, CapabilityRole::PlanModifier)
            .is_some();

        let (plan, modified) = match trigger {
            Some(ReplanTrigger::UserModification {
                original_plan,
                instructions,
            }) if modifier_available => {
                // 用户修改：不限次数、不动计数器
                let plan = self
                    .modification_path(ctx, &node, original_plan, instructions)
                    .await?;
                (plan, true)
            }
            Some(ReplanTrigger::UserModification { instructions, .. }) => {
                // 无 PlanModifier 可用，指令并入兜底路径的原因；
                // 用户修改不计入系统尝试次数，也不受上限拦截
                let plan = self
                    .full_replan_path(
                        ctx,
                        node_id,
                        node.error.clone(),
                        format!("modification requested without a plan modifier: {instructions}"),
                        false,
                    )
                    .await?;
                (plan, false)
            }
            Some(ReplanTrigger::SystemRetry { prior_error, reason }) => {
                let plan = self
                    .full_replan_path(ctx, node_id, prior_error, reason, true)
                    .await?;
                (plan, false)
            }
            None => {
                let plan = self
                    .full_replan_path(
                        ctx,
                        node_id,
                        node.error.clone(),
                        "replan requested".into(),
                        true,
                    )
                    .await?;
                (plan, false)
            }
        };

        if plan.tasks.is_empty() {
            return Err(EngineError::Validation(
                "replanning yielded an empty plan".into(),
            ));
        }
        plan.validate().map_err(EngineError::Validation)?;

        let decision = if ctx.config.review.plans {
            ctx.review_plan(&node, &plan, modified).await?
        } else {
            ReviewDecision::Approved
        };
        settle_review(ctx, node_id, plan, decision).await
    }
}
