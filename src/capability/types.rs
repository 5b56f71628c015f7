//! 能力调用的结构化输入与输出

use serde::{Deserialize, Serialize};

use crate::context::AssembledContext;
use crate::node::PlanOutput;

/// 重规划指令（系统路径附带给 Planner 的上下文）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanDirective {
    pub prior_error: Option<String>,
    pub reason: String,
    /// 本次是第几次系统尝试（从 1 起）
    pub attempt: u32,
}

/// 能力调用入参：按角色打标签
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CapabilityInput {
    Atomize {
        context: AssembledContext,
    },
    Plan {
        context: AssembledContext,
        replan: Option<ReplanDirective>,
    },
    Execute {
        context: AssembledContext,
    },
    Aggregate {
        context: AssembledContext,
    },
    ModifyPlan {
        original_plan: Option<PlanOutput>,
        instructions: String,
    },
}

/// 能力调用出参
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum CapabilityOutput {
    /// Atomizer 的判定：节点是否可直接执行
    Decision { is_atomic: bool },
    /// Planner / PlanModifier 的子任务序列
    Plan(PlanOutput),
    /// Executor / Aggregator 的结构化产出
    Value(serde_json::Value),
}
