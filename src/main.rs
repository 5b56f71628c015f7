//! hive - 层级化任务执行引擎
//!
//! 入口：初始化日志、加载配置、注册脚本化能力并跑一个演示目标。

use std::sync::Arc;

use anyhow::Context;
use hive::capability::scripted::{
    JoinAggregator, ScriptedAtomizer, ScriptedExecutor, ScriptedPlanner,
};
use hive::capability::{CapabilityRegistry, CapabilityRole};
use hive::node::{NodeType, PlanOutput, PlannedTask, TaskKind};
use hive::{load_config, ExecutionEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config = load_config(None).context("Failed to load config")?;

    // 演示用的脚本化能力：根目标分解为检索 -> 起草 -> 润色
    let goal = "write a short report on the hive engine";
    let plan = PlanOutput {
        tasks: vec![
            PlannedTask {
                goal: "collect background material".into(),
                task_kind: TaskKind::search(),
                node_type: NodeType::Execute,
                depends_on_indices: vec![],
            },
            PlannedTask {
                goal: "draft the report".into(),
                task_kind: TaskKind::write(),
                node_type: NodeType::Execute,
                depends_on_indices: vec![0],
            },
            PlannedTask {
                goal: "polish the draft".into(),
                task_kind: TaskKind::write(),
                node_type: NodeType::Execute,
                depends_on_indices: vec![1],
            },
        ],
    };

    let mut registry = CapabilityRegistry::new();
    registry
        .register(CapabilityRole::Atomizer, None, Arc::new(ScriptedAtomizer::new(1)))
        .context("register atomizer")?;
    registry
        .register(
            CapabilityRole::Planner,
            None,
            Arc::new(ScriptedPlanner::new().plan_for(goal, plan)),
        )
        .context("register planner")?;
    registry
        .register(CapabilityRole::Executor, None, Arc::new(ScriptedExecutor::new()))
        .context("register executor")?;
    registry
        .register(CapabilityRole::Aggregator, None, Arc::new(JoinAggregator::new()))
        .context("register aggregator")?;

    let engine = ExecutionEngine::builder(registry).config(config).build();
    let report = engine.run(goal).await.context("Engine run failed")?;

    println!("status: {}", report.status);
    println!("nodes:  {}", report.node_count);
    if let Some(result) = report.result {
        println!("result:\n{}", result.summary);
    }
    Ok(())
}
