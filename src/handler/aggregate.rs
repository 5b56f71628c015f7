//! 聚合处理器
//!
//! 调度器在子图全部终态后把节点迁入 AGGREGATING，本处理器不再认领。
//! 已完成子节点全部失败时不做合成，转入 NEEDS_REPLAN 触发系统重规划
//! （失败分解的自动恢复）；否则按冗余消除后的上下文调用 Aggregator，
//! 结果处理与执行路径一致。

use async_trait::async_trait;

use crate::capability::{CapabilityInput, CapabilityRole};
use crate::context::ContextKind;
use crate::error::EngineError;
use crate::handler::execute::output_value;
use crate::handler::{HandlerContext, HandlerOutcome, NodeHandler};
use crate::node::{NodeId, NodeResult, NodeStatus, ReplanTrigger, TaskNode};

#[derive(Default)]
pub struct AggregateHandler;

impl AggregateHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeHandler for AggregateHandler {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn claim_target(&self) -> Option<NodeStatus> {
        None
    }

    fn validate(&self, node: &TaskNode) -> Result<(), EngineError> {
        if node.status != NodeStatus::Aggregating {
            return Err(EngineError::Validation(format!(
                "aggregate handler expects an AGGREGATING node, got {} ({})",
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

        // 全失败子图：带着子节点错误转入系统重规划，而非从纯失败中合成
        let failed_errors: Option<Vec<String>> = {
            let graph = ctx.graph.read().await;
            let sub_graph_id = node.sub_graph_id.clone().ok_or_else(|| {
                EngineError::Validation(format!("node {} aggregates without a sub-graph", node.id))
            })?;
            let completed: Vec<_> = graph
                .sub_graph_nodes(&sub_graph_id)
                .into_iter()
                .filter(|n| matches!(n.status, NodeStatus::Done | NodeStatus::Failed))
                .collect();
            if !completed.is_empty()
                && completed.iter().all(|n| n.status == NodeStatus::Failed)
            {
                Some(
                    completed
                        .iter()
                        .map(|n| n.error.clone().unwrap_or_else(|| "unknown error".into()))
                        .collect(),
                )
            } else {
                None
            }
        };
        if let Some(errors) = failed_errors {
            let mut graph = ctx.graph.write().await;
            let node = graph.node_mut(node_id)?;
            node.replan = Some(ReplanTrigger::SystemRetry {
                prior_error: Some(errors.join("; ")),
                reason: format!("all {} children failed", errors.len()),
            });
            ctx.authority
                .apply(node, NodeStatus::NeedsReplan, "all children failed")?;
            return Ok(HandlerOutcome::Applied);
        }

        let context = ctx.assemble(&node, ContextKind::Aggregation).await?;
        let output = ctx
            .invoke_capability(&node, CapabilityRole::Aggregator, &CapabilityInput::Aggregate {
                context,
            })
            .await?;
        Ok(HandlerOutcome::Completed(NodeResult::classify(output_value(
            output,
        ))))
    }
}
