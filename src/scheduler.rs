//! 调度器
//!
//! 单控制循环，按节点创建顺序（FIFO）扫描：晋升依赖已终态的 PENDING 节点，
//! 把 READY / NEEDS_REPLAN / 子节点全部终态的 PLAN_DONE 节点成波派发到对应处理器；
//! 波内用 Semaphore 限制在途并发（许可随任务移动），波间汇合。
//! 节点在挂起前已被认领（或由本循环同步迁入 AGGREGATING），同一时刻单写者。
//! 处理器任务 panic 被吸收为该节点的失败，不影响图的其余部分；
//! 每轮循环与每个挂起点都检查取消信号，取消时把所有非终态节点迁入 CANCELLED。

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::EngineError;
use crate::handler::aggregate::AggregateHandler;
use crate::handler::execute::ExecuteHandler;
use crate::handler::plan::PlanHandler;
use crate::handler::ready::ReadyDispatchHandler;
use crate::handler::replan::ReplanHandler;
use crate::handler::{HandlerContext, NodeHandler};
use crate::node::{NodeId, NodeStatus};

/// 一次派发的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Ready,
    Replan,
    Aggregate,
}

pub struct Scheduler {
    ctx: HandlerContext,
    ready: Arc<ReadyDispatchHandler>,
    aggregate: Arc<AggregateHandler>,
    replan: Arc<ReplanHandler>,
}

impl Scheduler {
    pub fn new(ctx: HandlerContext) -> Self {
        let plan = Arc::new(PlanHandler::new());
        let execute = Arc::new(ExecuteHandler::new());
        Self {
            ctx,
            ready: Arc::new(ReadyDispatchHandler::new(plan, execute)),
            aggregate: Arc::new(AggregateHandler::new()),
            replan: Arc::new(ReplanHandler::new()),
        }
    }

    /// 驱动任务图直到根节点终态。
    /// 无可派发节点且无在途任务而根未终态时返回 Stalled，而非挂死。
    pub async fn run_to_completion(&self) -> Result<(), EngineError> {
        let semaphore = Arc::new(Semaphore::new(
            self.ctx.config.engine.max_concurrent_nodes.max(1),
        ));

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(self.cancel_all().await);
            }
            if self.root_terminal().await? {
                return Ok(());
            }

            self.promote_pending().await?;
            let wave = self.collect_dispatchable().await?;
            if wave.is_empty() {
                if self.root_terminal().await? {
                    return Ok(());
                }
                return Err(EngineError::Stalled(
                    "no dispatchable node and nothing in flight".into(),
                ));
            }

            // 成波派发：许可随任务移动，波内并发受限，波间汇合
            let mut handles = Vec::with_capacity(wave.len());
            for (node_id, dispatch) in wave {
                if dispatch == Dispatch::Aggregate {
                    // 仅子节点全部终态的节点可迁入 AGGREGATING（读后终态可见性）
                    self.ctx
                        .transition(&node_id, NodeStatus::Aggregating, "children terminal")
                        .await?;
                }
                let permit = tokio::select! {
                    _ = self.ctx.cancel.cancelled() => break,
                    permit = semaphore.clone().acquire_owned() => {
                        permit.expect("semaphore closed")
                    }
                };

                let handler: Arc<dyn NodeHandler> = match dispatch {
                    Dispatch::Ready => self.ready.clone(),
                    Dispatch::Replan => self.replan.clone(),
                    Dispatch::Aggregate => self.aggregate.clone(),
                };
                let ctx = self.ctx.clone();
                handles.push((
                    node_id.clone(),
                    tokio::spawn(async move {
                        let _permit = permit;
                        handler.run(&ctx, &node_id).await
                    }),
                ));
            }

            for (node_id, handle) in handles {
                match handle.await {
                    Ok(success) => {
                        tracing::debug!(node = %node_id, success, "node handled");
                    }
                    Err(join_error) => {
                        // panic 隔离：吸收为该节点的失败
                        self.mark_panicked(&node_id, &join_error).await;
                    }
                }
            }
        }
    }

    async fn root_terminal(&self) -> Result<bool, EngineError> {
        let graph = self.ctx.graph.read().await;
        let root_id = graph.root_id().clone();
        Ok(graph.node(&root_id)?.is_terminal())
    }

    /// 晋升依赖全部终态的 PENDING 节点（失败的依赖也算终态：
    /// 其错误文本会通过上下文条目可见，而不是让图永远阻塞）
    async fn promote_pending(&self) -> Result<(), EngineError> {
        let mut graph = self.ctx.graph.write().await;
        for node_id in graph.promotable() {
            let node = graph.node_mut(&node_id)?;
            self.ctx
                .authority
                .apply(node, NodeStatus::Ready, "dependencies terminal")?;
        }
        Ok(())
    }

    async fn collect_dispatchable(&self) -> Result<Vec<(NodeId, Dispatch)>, EngineError> {
        let graph = self.ctx.graph.read().await;
        let mut wave = Vec::new();
        for node_id in graph.creation_order() {
            let node = graph.node(node_id)?;
            match node.status {
                NodeStatus::Ready => wave.push((node_id.clone(), Dispatch::Ready)),
                NodeStatus::NeedsReplan => wave.push((node_id.clone(), Dispatch::Replan)),
                NodeStatus::PlanDone if graph.children_terminal(node_id) => {
                    wave.push((node_id.clone(), Dispatch::Aggregate))
                }
                _ => {}
            }
        }
        Ok(wave)
    }

    async fn mark_panicked(&self, node_id: &NodeId, join_error: &tokio::task::JoinError) {
        tracing::error!(node = %node_id, %join_error, "node task panicked");
        let mut graph = self.ctx.graph.write().await;
        if let Ok(node) = graph.node_mut(node_id) {
            if !node.is_terminal() {
                node.error = Some(format!("node task panicked: {join_error}"));
                if let Err(apply_error) =
                    self.ctx.authority.apply(node, NodeStatus::Failed, "task panicked")
                {
                    tracing::error!(node = %node_id, %apply_error, "failed to fail panicked node");
                }
            }
        }
    }

    /// 取消收口：全部非终态节点迁入 CANCELLED
    async fn cancel_all(&self) -> EngineError {
        let mut graph = self.ctx.graph.write().await;
        for node_id in graph.creation_order().to_vec() {
            if let Ok(node) = graph.node_mut(&node_id) {
                if !node.is_terminal() {
                    if let Err(apply_error) =
                        self.ctx.authority.apply(node, NodeStatus::Cancelled, "run cancelled")
                    {
                        tracing::error!(node = %node_id, %apply_error, "failed to cancel node");
                    }
                }
            }
        }
        EngineError::Cancelled
    }
}
