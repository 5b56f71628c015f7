//! 脚本化能力（用于测试与演示，无需外部服务）
//!
//! 确定性实现：Atomizer 按层深判定、Planner 按目标返回预置计划序列、
//! Executor 回显目标、Aggregator 拼接条目；各实现都带调用计数，便于断言。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::capability::{Capability, CapabilityInput, CapabilityOutput, CapabilityRole};
use crate::node::{PlanOutput, TaskNode};
use crate::trace::TraceSink;

/// 按层深判定：layer 达到 atomic_at_layer 即视为可直接执行
pub struct ScriptedAtomizer {
    atomic_at_layer: u32,
    invocations: AtomicUsize,
}

impl ScriptedAtomizer {
    pub fn new(atomic_at_layer: u32) -> Self {
        Self {
            atomic_at_layer,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for ScriptedAtomizer {
    fn name(&self) -> &str {
        "scripted_atomizer"
    }

    fn role(&self) -> CapabilityRole {
        CapabilityRole::Atomizer
    }

    async fn invoke(
        &self,
        node: &TaskNode,
        _input: &CapabilityInput,
        _trace: &dyn TraceSink,
    ) -> Result<CapabilityOutput, String> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(CapabilityOutput::Decision {
            is_atomic: node.layer >= self.atomic_at_layer,
        })
    }
}

/// 按目标返回预置计划：同一目标可预置多份（重规划时依次弹出，最后一份重复生效）；
/// 未预置的目标返回空计划（无需继续分解）
pub struct ScriptedPlanner {
    plans: Mutex<HashMap<String, VecDeque<PlanOutput>>>,
    invocations: AtomicUsize,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self {
            plans: Mutex::new(HashMap::new()),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn plan_for(self, goal: impl Into<String>, plan: PlanOutput) -> Self {
        if let Ok(mut plans) = self.plans.lock() {
            plans.entry(goal.into()).or_default().push_back(plan);
        }
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for ScriptedPlanner {
    fn name(&self) -> &str {
        "scripted_planner"
    }

    fn role(&self) -> CapabilityRole {
        CapabilityRole::Planner
    }

    async fn invoke(
        &self,
        node: &TaskNode,
        _input: &CapabilityInput,
        _trace: &dyn TraceSink,
    ) -> Result<CapabilityOutput, String> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let mut plans = self.plans.lock().map_err(|_| "planner script poisoned")?;
        let plan = match plans.get_mut(&node.goal) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => PlanOutput::default(),
        };
        Ok(CapabilityOutput::Plan(plan))
    }
}

/// 按目标返回预置结果，未预置时回显目标文本
pub struct ScriptedExecutor {
    outputs: Mutex<HashMap<String, Result<serde_json::Value, String>>>,
    invocations: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            outputs: Mutex::new(HashMap::new()),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn output_for(self, goal: impl Into<String>, value: serde_json::Value) -> Self {
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.insert(goal.into(), Ok(value));
        }
        self
    }

    pub fn fail_for(self, goal: impl Into<String>, message: impl Into<String>) -> Self {
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.insert(goal.into(), Err(message.into()));
        }
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted_executor"
    }

    fn role(&self) -> CapabilityRole {
        CapabilityRole::Executor
    }

    async fn invoke(
        &self,
        node: &TaskNode,
        _input: &CapabilityInput,
        _trace: &dyn TraceSink,
    ) -> Result<CapabilityOutput, String> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let outputs = self.outputs.lock().map_err(|_| "executor script poisoned")?;
        match outputs.get(&node.goal) {
            Some(Ok(value)) => Ok(CapabilityOutput::Value(value.clone())),
            Some(Err(message)) => Err(message.clone()),
            None => Ok(CapabilityOutput::Value(serde_json::json!(format!(
                "completed: {}",
                node.goal
            )))),
        }
    }
}

/// 把聚合上下文的条目拼接成一段文本
pub struct JoinAggregator {
    invocations: AtomicUsize,
}

impl JoinAggregator {
    pub fn new() -> Self {
        Self {
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Default for JoinAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for JoinAggregator {
    fn name(&self) -> &str {
        "join_aggregator"
    }

    fn role(&self) -> CapabilityRole {
        CapabilityRole::Aggregator
    }

    async fn invoke(
        &self,
        node: &TaskNode,
        input: &CapabilityInput,
        _trace: &dyn TraceSink,
    ) -> Result<CapabilityOutput, String> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let CapabilityInput::Aggregate { context } = input else {
            return Err("aggregator expects an aggregation context".to_string());
        };
        let mut lines = vec![format!("# {}", node.goal)];
        for item in &context.items {
            let content = match &item.content {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            lines.push(format!("- [{}] {}", item.goal, content));
        }
        Ok(CapabilityOutput::Value(serde_json::json!(lines.join("\n"))))
    }
}

/// 固定返回预置修订计划的 PlanModifier
pub struct ScriptedPlanModifier {
    plan: PlanOutput,
    invocations: AtomicUsize,
}

impl ScriptedPlanModifier {
    pub fn new(plan: PlanOutput) -> Self {
        Self {
            plan,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for ScriptedPlanModifier {
    fn name(&self) -> &str {
        "scripted_plan_modifier"
    }

    fn role(&self) -> CapabilityRole {
        CapabilityRole::PlanModifier
    }

    async fn invoke(
        &self,
        _node: &TaskNode,
        _input: &CapabilityInput,
        _trace: &dyn TraceSink,
    ) -> Result<CapabilityOutput, String> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(CapabilityOutput::Plan(self.plan.clone()))
    }
}
