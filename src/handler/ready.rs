//! Ready 派发处理器
//!
//! 为 READY 节点裁定 node_type：深度护栏优先（达到上限强制 EXECUTE，绝不调用 Atomizer），
//! 其次根节点强制规划、纯深度阈值开关，最后询问 Atomizer（不可用或出错时开放失败，
//! 默认 EXECUTE，避免图停摆）。裁定后把节点同步重置回 READY 再直接交给
//! Plan/Execute 处理器，保证内层认领步骤（READY -> RUNNING）定义良好；
//! 这次重置是同一控制流内的交接，不构成竞争。

use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::{CapabilityInput, CapabilityOutput, CapabilityRole};
use crate::context::ContextKind;
use crate::engine::EngineEvent;
use crate::error::EngineError;
use crate::handler::execute::ExecuteHandler;
use crate::handler::plan::PlanHandler;
use crate::handler::{HandlerContext, HandlerOutcome, NodeHandler};
use crate::node::{NodeId, NodeStatus, NodeType, TaskNode};

pub struct ReadyDispatchHandler {
    plan: Arc<PlanHandler>,
    execute: Arc<ExecuteHandler>,
}

impl ReadyDispatchHandler {
    pub fn new(plan: Arc<PlanHandler>, execute: Arc<ExecuteHandler>) -> Self {
        Self { plan, execute }
    }

    /// 裁定节点类型
    async fn resolve_node_type(
        &self,
        ctx: &HandlerContext,
        node: &TaskNode,
    ) -> Result<NodeType, EngineError> {
        let engine = &ctx.config.engine;

        // 深度护栏：到达上限一律执行，跳过原子判断
        if node.layer >= engine.max_depth {
            return Ok(NodeType::Execute);
        }
        if node.parent_id.is_none() && engine.force_root_planning {
            return Ok(NodeType::Plan);
        }
        if engine.skip_atomizer {
            return Ok(if node.layer < engine.atomizer_depth_threshold {
                NodeType::Plan
            } else {
                NodeType::Execute
            });
        }

        if ctx.registry.select(node, CapabilityRole::Atomizer).is_none() {
            return Ok(NodeType::Execute);
        }
        let context = ctx.assemble(node, ContextKind::Atomization).await?;
        match ctx
            .invoke_capability(node, CapabilityRole::Atomizer, &CapabilityInput::Atomize { context })
            .await
        {
            Ok(CapabilityOutput::Decision { is_atomic }) => Ok(if is_atomic {
                NodeType::Execute
            } else {
                NodeType::Plan
            }),
            Ok(other) => {
                tracing::warn!(node = %node.id, ?other, "atomizer returned unexpected shape, defaulting to execute");
                Ok(NodeType::Execute)
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(error) => {
                tracing::warn!(node = %node.id, %error, "atomizer failed, defaulting to execute");
                Ok(NodeType::Execute)
            }
        }
    }
}

#[async_trait]
impl NodeHandler for ReadyDispatchHandler {
    fn name(&self) -> &'static str {
        "ready_dispatch"
    }

    fn validate(&self, node: &TaskNode) -> Result<(), EngineError> {
        if node.status != NodeStatus::Ready {
            return Err(EngineError::Validation(format!(
                "ready dispatch expects a READY node, got {} ({})",
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
        let node_type = self.resolve_node_type(ctx, &node).await?;

        {
            let mut graph = ctx.graph.write().await;
            let node = graph.node_mut(node_id)?;
            node.node_type = node_type;
            // 同步交接：重置 READY，让内层处理器自己认领
            ctx.authority.apply(node, NodeStatus::Ready, "hand-off")?;
        }
        ctx.emit(EngineEvent::NodeTypeResolved {
            node_id: node_id.clone(),
            node_type,
        });

        let success = match node_type {
            NodeType::Plan => self.plan.run(ctx, node_id).await,
            NodeType::Execute => self.execute.run(ctx, node_id).await,
        };
        Ok(HandlerOutcome::Delegated { success })
    }
}
