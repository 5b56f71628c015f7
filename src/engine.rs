//! 执行引擎门面
//!
//! EngineBuilder 组装能力注册表、知识库、评审门、追踪与事件通道，
//! ExecutionEngine::run 以一个目标字符串引导根节点并驱动调度器直至根终态，
//! 返回 RunReport。事件通道是尽力而为的旁路输出：无人消费不阻塞引擎。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::capability::{CapabilityCache, CapabilityRegistry};
use crate::config::EngineConfig;
use crate::context::ContextAssembler;
use crate::error::EngineError;
use crate::graph::TaskGraph;
use crate::handler::{HandlerContext, MetricsRegistry, MetricsSnapshot};
use crate::knowledge::{InMemoryKnowledgeStore, KnowledgeStore};
use crate::node::{NodeId, NodeResult, NodeStatus, NodeType, TaskNode, TransitionAuthority};
use crate::review::ReviewGate;
use crate::scheduler::Scheduler;
use crate::trace::{NoopTraceSink, TraceSink};

/// 引擎事件：状态迁移与关键节点动作的旁路流，供 UI / 日志消费
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    NodeStatusChanged {
        node_id: NodeId,
        from: NodeStatus,
        to: NodeStatus,
        reason: String,
    },
    NodeTypeResolved {
        node_id: NodeId,
        node_type: NodeType,
    },
    ReviewRequested {
        node_id: NodeId,
        stage: String,
    },
    PlanAccepted {
        node_id: NodeId,
        children: usize,
    },
    NodeCompleted {
        node_id: NodeId,
        summary: String,
    },
    NodeFailed {
        node_id: NodeId,
        error: String,
    },
    RunFinished {
        root_id: NodeId,
        status: NodeStatus,
        duration_ms: u64,
    },
}

/// 一次运行的汇总
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub root_id: NodeId,
    pub status: NodeStatus,
    pub result: Option<NodeResult>,
    pub error: Option<String>,
    /// 运行结束时图中的节点总数（被替换丢弃的子图不计）
    pub node_count: usize,
    pub duration_ms: u64,
}

/// 执行引擎：持有跨运行的协作者，每次 run 构建一张新任务图。
///
/// 取消令牌与引擎同生命周期：cancel() 之后该引擎的后续 run 立即以
/// Cancelled 结束，需要继续工作时另建引擎。graph() 只保留最近一次
/// run 的任务图，历史结果走知识库查询。
pub struct ExecutionEngine {
    config: Arc<EngineConfig>,
    registry: Arc<CapabilityRegistry>,
    knowledge: Arc<dyn KnowledgeStore>,
    review: Option<Arc<dyn ReviewGate>>,
    trace: Arc<dyn TraceSink>,
    cache: Option<Arc<CapabilityCache>>,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
    cancel: CancellationToken,
    metrics: Arc<MetricsRegistry>,
    last_graph: std::sync::Mutex<Option<Arc<RwLock<TaskGraph>>>>,
}

impl ExecutionEngine {
    pub fn builder(registry: CapabilityRegistry) -> EngineBuilder {
        EngineBuilder::new(registry)
    }

    /// 以一个目标引导根节点并驱动任务图直至根终态
    pub async fn run(&self, goal: impl Into<String>) -> Result<RunReport, EngineError> {
        let start = Instant::now();
        let root = TaskNode::new_root(goal);
        let root_id = root.id.clone();
        let graph = Arc::new(RwLock::new(TaskGraph::new(root)));
        *self
            .last_graph
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(graph.clone());

        let ctx = HandlerContext {
            graph: graph.clone(),
            registry: self.registry.clone(),
            knowledge: self.knowledge.clone(),
            authority: Arc::new(TransitionAuthority::new(self.events.clone())),
            assembler: Arc::new(ContextAssembler::new()),
            review: self.review.clone(),
            trace: self.trace.clone(),
            config: self.config.clone(),
            cache: self.cache.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
            metrics: self.metrics.clone(),
        };

        tracing::info!(root = %root_id, "run started");
        let outcome = Scheduler::new(ctx.clone()).run_to_completion().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let report = {
            let graph = graph.read().await;
            let root = graph.node(&root_id)?;
            RunReport {
                root_id: root_id.clone(),
                status: root.status,
                result: root.result.clone(),
                error: root.error.clone(),
                node_count: graph.len(),
                duration_ms,
            }
        };
        ctx.emit(EngineEvent::RunFinished {
            root_id: root_id.clone(),
            status: report.status,
            duration_ms,
        });
        tracing::info!(root = %root_id, status = %report.status, duration_ms, "run finished");

        outcome?;
        Ok(report)
    }

    /// 请求取消当前运行：在途操作在下一个检查点退出，
    /// 所有非终态节点被置为 CANCELLED。令牌不会复位，
    /// 取消是整个引擎实例的终点
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 最近一次运行的任务图（运行中也可读取，用于观察进度）
    pub fn graph(&self) -> Option<Arc<RwLock<TaskGraph>>> {
        self.last_graph
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 各处理器的聚合指标
    pub fn metrics(&self) -> std::collections::HashMap<String, MetricsSnapshot> {
        self.metrics.snapshot()
    }
}

/// 引擎构建器
pub struct EngineBuilder {
    config: EngineConfig,
    registry: CapabilityRegistry,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    review: Option<Arc<dyn ReviewGate>>,
    trace: Option<Arc<dyn TraceSink>>,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EngineBuilder {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self {
            config: EngineConfig::default(),
            registry,
            knowledge: None,
            review: None,
            trace: None,
            events: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn knowledge(mut self, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn review_gate(mut self, gate: Arc<dyn ReviewGate>) -> Self {
        self.review = Some(gate);
        self
    }

    pub fn trace_sink(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// 订阅引擎事件流；返回消费端
    pub fn events(mut self) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        (self, rx)
    }

    pub fn build(self) -> ExecutionEngine {
        let cache = self
            .config
            .cache
            .enabled
            .then(|| Arc::new(CapabilityCache::new(Duration::from_secs(self.config.cache.ttl_secs))));
        ExecutionEngine {
            config: Arc::new(self.config),
            registry: Arc::new(self.registry),
            knowledge: self
                .knowledge
                .unwrap_or_else(|| Arc::new(InMemoryKnowledgeStore::new())),
            review: self.review,
            trace: self.trace.unwrap_or_else(|| Arc::new(NoopTraceSink)),
            cache,
            events: self.events,
            cancel: CancellationToken::new(),
            metrics: Arc::new(MetricsRegistry::new()),
            last_graph: std::sync::Mutex::new(None),
        }
    }
}
