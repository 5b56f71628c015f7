//! 处理器共享模板
//!
//! 每个处理器实现 validate / claim / process，run() 提供统一流程：
//! 校验前置条件 -> 认领节点（Running）-> 处理 -> 落库知识库 -> 指标与阶段追踪。
//! run() 是唯一的异常边界：任何错误都转为 FAILED 迁移（已终态除外）+ 布尔失败返回，
//! 不会有错误逃逸到调度器，一个节点的故障由此与图的其余部分隔离。

pub mod aggregate;
pub mod execute;
pub mod metrics;
pub mod plan;
pub mod ready;
pub mod replan;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::capability::{
    CapabilityCache, CapabilityInput, CapabilityOutput, CapabilityRegistry, CapabilityRole,
};
use crate::config::{EngineConfig, TimeoutPolicy};
use crate::context::{AssembledContext, ContextAssembler, ContextKind};
use crate::engine::EngineEvent;
use crate::error::EngineError;
use crate::graph::TaskGraph;
use crate::knowledge::KnowledgeStore;
use crate::node::{NodeId, NodeStatus, PlanOutput, TaskNode, TransitionAuthority};
use crate::review::{ReviewDecision, ReviewGate};
use crate::trace::{StageOutcome, TraceSink};

pub use metrics::{HandlerMetrics, MetricsRegistry, MetricsSnapshot};

/// 一次派发期间的协作者集合；只在派发期间存在，从不持久化
#[derive(Clone)]
pub struct HandlerContext {
    pub graph: Arc<RwLock<TaskGraph>>,
    pub registry: Arc<CapabilityRegistry>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub authority: Arc<TransitionAuthority>,
    pub assembler: Arc<ContextAssembler>,
    pub review: Option<Arc<dyn ReviewGate>>,
    pub trace: Arc<dyn TraceSink>,
    pub config: Arc<EngineConfig>,
    pub cache: Option<Arc<CapabilityCache>>,
    pub events: Option<mpsc::UnboundedSender<EngineEvent>>,
    pub cancel: CancellationToken,
    pub metrics: Arc<MetricsRegistry>,
}

impl HandlerContext {
    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// 读取节点快照
    pub async fn node_snapshot(&self, node_id: &NodeId) -> Result<TaskNode, EngineError> {
        let graph = self.graph.read().await;
        graph.node(node_id).cloned()
    }

    /// 应用一次状态迁移（写锁内，由 TransitionAuthority 裁定）
    pub async fn transition(
        &self,
        node_id: &NodeId,
        to: NodeStatus,
        reason: &str,
    ) -> Result<(), EngineError> {
        let mut graph = self.graph.write().await;
        let node = graph.node_mut(node_id)?;
        self.authority.apply(node, to, reason)
    }

    /// 为节点装配指定种类的上下文
    pub async fn assemble(
        &self,
        node: &TaskNode,
        kind: ContextKind,
    ) -> Result<AssembledContext, EngineError> {
        let graph = self.graph.read().await;
        self.assembler
            .build(node, kind, self.knowledge.as_ref(), &graph)
            .await
    }

    /// 调用一个能力：取消检查 -> 缓存探查 -> 超时约束下的真实调用 -> 审计日志。
    /// 缓存未命中或禁用总是落到真实调用。
    pub async fn invoke_capability(
        &self,
        node: &TaskNode,
        role: CapabilityRole,
        input: &CapabilityInput,
    ) -> Result<CapabilityOutput, EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let capability =
            self.registry
                .resolve(node, role)
                .ok_or_else(|| EngineError::CapabilityUnavailable {
                    role,
                    kind: node.task_kind.to_string(),
                })?;
        let name = capability.name().to_string();

        let cache_key = match (&self.cache, self.config.cache.enabled) {
            (Some(cache), true) => cache.key(role, &name, &node.goal, input),
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key) {
                self.audit(&node.id, role, &name, true, "cache_hit", 0);
                return Ok(hit);
            }
        }

        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.engine.capability_timeout_secs);
        let invoked = tokio::select! {
            _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
            result = tokio::time::timeout(timeout, capability.invoke(node, input, self.trace.as_ref())) => result,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match invoked {
            Ok(Ok(output)) => {
                self.audit(&node.id, role, &name, true, "ok", duration_ms);
                if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                    cache.put(key, output.clone());
                }
                Ok(output)
            }
            Ok(Err(message)) => {
                self.audit(&node.id, role, &name, false, "error", duration_ms);
                Err(EngineError::CapabilityFailed { name, message })
            }
            Err(_) => {
                self.audit(&node.id, role, &name, false, "timeout", duration_ms);
                Err(EngineError::CapabilityFailed {
                    name,
                    message: format!("timed out after {}s", timeout.as_secs()),
                })
            }
        }
    }

    /// 结构化审计日志（JSON 一行）
    fn audit(
        &self,
        node_id: &NodeId,
        role: CapabilityRole,
        capability: &str,
        ok: bool,
        outcome: &str,
        duration_ms: u64,
    ) {
        let audit = serde_json::json!({
            "event": "capability_audit",
            "node": node_id,
            "role": role.to_string(),
            "capability": capability,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
        });
        tracing::info!(audit = %audit.to_string(), "capability");
    }

    /// 计划评审：未配置门即批准；等待受超时约束，超时按配置的默认裁决处理
    pub async fn review_plan(
        &self,
        node: &TaskNode,
        plan: &PlanOutput,
        modified: bool,
    ) -> Result<ReviewDecision, EngineError> {
        let Some(gate) = self.review.clone() else {
            return Ok(ReviewDecision::Approved);
        };
        self.emit(EngineEvent::ReviewRequested {
            node_id: node.id.clone(),
            stage: if modified { "modified_plan" } else { "plan" }.to_string(),
        });
        let wait = async {
            if modified {
                gate.review_modified_plan(node, plan).await
            } else {
                gate.review_plan(node, plan).await
            }
        };
        self.bounded_review(&node.id, wait).await
    }

    /// 执行前评审：未配置门即批准
    pub async fn review_execution(
        &self,
        node: &TaskNode,
        context: &AssembledContext,
    ) -> Result<ReviewDecision, EngineError> {
        let Some(gate) = self.review.clone() else {
            return Ok(ReviewDecision::Approved);
        };
        self.emit(EngineEvent::ReviewRequested {
            node_id: node.id.clone(),
            stage: "execution".to_string(),
        });
        self.bounded_review(&node.id, gate.review_execution(node, context))
            .await
    }

    async fn bounded_review(
        &self,
        node_id: &NodeId,
        wait: impl std::future::Future<Output = ReviewDecision>,
    ) -> Result<ReviewDecision, EngineError> {
        let timeout = Duration::from_secs(self.config.review.timeout_secs);
        let decision = tokio::select! {
            _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
            outcome = tokio::time::timeout(timeout, wait) => match outcome {
                Ok(decision) => decision,
                Err(_) => {
                    let fallback = self.config.review.on_timeout;
                    tracing::warn!(node = %node_id, ?fallback, "review timed out, applying configured default");
                    match fallback {
                        TimeoutPolicy::Approve => ReviewDecision::Approved,
                        TimeoutPolicy::Reject => ReviewDecision::Rejected {
                            reason: "review timed out".to_string(),
                        },
                    }
                }
            },
        };
        Ok(decision)
    }
}

/// 处理结果
#[derive(Debug)]
pub enum HandlerOutcome {
    /// 产出结果，模板负责写结果并迁移 Done
    Completed(crate::node::NodeResult),
    /// process 已自行完成全部迁移
    Applied,
    /// 已委托给内层处理器（其成败由内层模板处理）
    Delegated { success: bool },
}

/// run() 内部的流转结果
pub enum HandlerRun {
    Finished(String),
    Delegated(bool),
}

/// 节点处理器：五个处理器共用 run() 模板
#[async_trait]
pub trait NodeHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// 认领目标；None 表示调用方已完成认领（聚合由调度器先迁入 Aggregating）
    fn claim_target(&self) -> Option<NodeStatus> {
        Some(NodeStatus::Running)
    }

    /// 前置条件校验：状态/类型不匹配是编程逻辑错误，不是可重试故障
    fn validate(&self, node: &TaskNode) -> Result<(), EngineError>;

    async fn process(
        &self,
        ctx: &HandlerContext,
        node_id: &NodeId,
    ) -> Result<HandlerOutcome, EngineError>;

    /// 统一入口：返回本次处理是否成功；错误绝不向上传播
    async fn run(&self, ctx: &HandlerContext, node_id: &NodeId) -> bool {
        let start = Instant::now();
        ctx.trace.start_stage(node_id, self.name());

        let outcome = self.drive(ctx, node_id).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(HandlerRun::Finished(summary)) => {
                ctx.metrics.handler(self.name()).record(true, duration_ms);
                ctx.trace
                    .complete_stage(node_id, self.name(), StageOutcome::Output { summary });
                true
            }
            Ok(HandlerRun::Delegated(success)) => {
                ctx.metrics.handler(self.name()).record(success, duration_ms);
                ctx.trace.complete_stage(
                    node_id,
                    self.name(),
                    StageOutcome::Output {
                        summary: format!("delegated (success: {success})"),
                    },
                );
                success
            }
            Err(error) => {
                tracing::warn!(node = %node_id, handler = self.name(), %error, "handler failed");
                self.fail_node(ctx, node_id, &error).await;
                ctx.metrics.handler(self.name()).record(false, duration_ms);
                ctx.trace.complete_stage(
                    node_id,
                    self.name(),
                    StageOutcome::Error {
                        message: error.to_string(),
                    },
                );
                false
            }
        }
    }

    /// validate -> claim -> process -> 落库
    async fn drive(
        &self,
        ctx: &HandlerContext,
        node_id: &NodeId,
    ) -> Result<HandlerRun, EngineError> {
        let node = ctx.node_snapshot(node_id).await?;
        self.validate(&node)?;

        if let Some(target) = self.claim_target() {
            if node.status != target {
                ctx.transition(node_id, target, "claimed").await?;
            }
        }

        match self.process(ctx, node_id).await? {
            HandlerOutcome::Completed(result) => {
                let summary = result.summary.clone();
                {
                    let mut graph = ctx.graph.write().await;
                    let node = graph.node_mut(node_id)?;
                    node.result = Some(result);
                    node.error = None;
                    ctx.authority
                        .apply(node, NodeStatus::Done, "capability returned a result")?;
                }
                let node = ctx.node_snapshot(node_id).await?;
                ctx.knowledge.upsert(&node).await;
                ctx.emit(EngineEvent::NodeCompleted {
                    node_id: node_id.clone(),
                    summary: summary.clone(),
                });
                Ok(HandlerRun::Finished(summary))
            }
            HandlerOutcome::Applied => {
                let node = ctx.node_snapshot(node_id).await?;
                ctx.knowledge.upsert(&node).await;
                Ok(HandlerRun::Finished(format!("status: {}", node.status)))
            }
            HandlerOutcome::Delegated { success } => Ok(HandlerRun::Delegated(success)),
        }
    }

    /// 统一的失败收口：记录错误文本并迁入 FAILED（取消则 CANCELLED；已终态跳过）
    async fn fail_node(&self, ctx: &HandlerContext, node_id: &NodeId, error: &EngineError) {
        let terminal = matches!(
            ctx.node_snapshot(node_id).await,
            Ok(node) if node.is_terminal()
        );
        if terminal {
            return;
        }

        let to = if matches!(error, EngineError::Cancelled) {
            NodeStatus::Cancelled
        } else {
            NodeStatus::Failed
        };
        {
            let mut graph = ctx.graph.write().await;
            match graph.node_mut(node_id) {
                Ok(node) => {
                    node.error = Some(error.to_string());
                    if let Err(apply_error) = ctx.authority.apply(node, to, "handler error") {
                        tracing::error!(node = %node_id, %apply_error, "failed to fail node");
                    }
                }
                Err(_) => return,
            }
        }
        if let Ok(node) = ctx.node_snapshot(node_id).await {
            ctx.knowledge.upsert(&node).await;
        }
        ctx.emit(EngineEvent::NodeFailed {
            node_id: node_id.clone(),
            error: error.to_string(),
        });
    }
}
