//! hive - 层级化任务执行引擎
//!
//! 把一个目标递归分解为任务树并调度执行：每个节点走九状态状态机，
//! 五个处理器（派发 / 规划 / 执行 / 聚合 / 重规划）共享一套处理模板，
//! 能力（Atomizer / Planner / Executor / Aggregator / PlanModifier）可插拔。
//!
//! 模块划分：
//! - **node**: 任务节点、九状态状态机与迁移裁定
//! - **graph**: 任务图（子图分组、依赖解析、传递闭包与冗余消除）
//! - **capability**: 可插拔能力：角色、注册表、调用缓存与脚本化实现
//! - **handler**: 五个节点处理器与共享处理模板
//! - **scheduler**: 信号量限流的协作式调度循环
//! - **engine**: 引擎门面：构建、运行、取消与事件流
//! - **context**: 能力调用的上下文装配
//! - **knowledge**: 节点结果的知识库
//! - **review**: 人工评审门
//! - **trace**: 阶段追踪
//! - **config**: 配置加载（TOML + HIVE__ 环境变量）

pub mod capability;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod graph;
pub mod handler;
pub mod knowledge;
pub mod node;
pub mod observability;
pub mod review;
pub mod scheduler;
pub mod trace;

pub use config::{load_config, EngineConfig, TimeoutPolicy};
pub use engine::{EngineBuilder, EngineEvent, ExecutionEngine, RunReport};
pub use error::EngineError;
pub use node::{
    NodeId, NodeResult, NodeStatus, NodeType, PlanOutput, PlannedTask, TaskKind, TaskNode,
};
pub use review::{ChannelReviewGate, ReviewDecision, ReviewGate, ReviewRequest, ReviewStage};
