//! 执行处理器
//!
//! 装配执行上下文，走可选的执行前评审（未配置门即自动批准），
//! 调用 Executor，并按结果形状生成标签与摘要——分类只影响展示，
//! 永远不改变控制流。

use async_trait::async_trait;

use crate::capability::{CapabilityInput, CapabilityOutput, CapabilityRole};
use crate::context::ContextKind;
use crate::error::EngineError;
use crate::handler::{HandlerContext, HandlerOutcome, NodeHandler};
use crate::node::{NodeId, NodeResult, NodeStatus, NodeType, TaskNode};
use crate::review::ReviewDecision;

#[derive(Default)]
pub struct ExecuteHandler;

impl ExecuteHandler {
    pub fn new() -> Self {
        Self
    }
}

/// 任意输出形状都接受，统一折算为 JSON 值
pub(crate) fn output_value(output: CapabilityOutput) -> serde_json::Value {
    match output {
        CapabilityOutput::Value(value) => value,
        CapabilityOutput::Plan(plan) => serde_json::to_value(plan).unwrap_or_default(),
        CapabilityOutput::Decision { is_atomic } => serde_json::json!({ "is_atomic": is_atomic }),
    }
}

#[async_trait]
impl NodeHandler for ExecuteHandler {
    fn name(&self) -> &'static str {
        "execute"
    }

    fn validate(&self, node: &TaskNode) -> Result<(), EngineError> {
        if node.status != NodeStatus::Ready || node.node_type != NodeType::Execute {
            return Err(EngineError::Validation(format!(
                "execute handler expects a READY execute node, got {} {:?} ({})",
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
        let context = ctx.assemble(&node, ContextKind::Execution).await?;

        if ctx.config.review.executions {
            match ctx.review_execution(&node, &context).await? {
                ReviewDecision::Approved => {}
                // 对一次执行「要求修改」没有意义，非批准即失败并记录裁决
                other => {
                    return Err(EngineError::ReviewFailed(format!(
                        "execution not approved: {:?}",
                        other
                    )))
                }
            }
        }

        let output = ctx
            .invoke_capability(&node, CapabilityRole::Executor, &CapabilityInput::Execute {
                context,
            })
            .await?;
        Ok(HandlerOutcome::Completed(NodeResult::classify(output_value(
            output,
        ))))
    }
}
