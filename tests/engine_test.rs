//! 引擎集成测试
//!
//! 用脚本化能力驱动完整的分解-执行-聚合流程，覆盖冗余消除、深度护栏、
//! 重规划上限与恢复、评审门、取消与调用缓存。

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::time::{sleep, Duration};

    use hive::capability::scripted::{
        JoinAggregator, ScriptedAtomizer, ScriptedExecutor, ScriptedPlanModifier, ScriptedPlanner,
    };
    use hive::capability::{
        Capability, CapabilityInput, CapabilityOutput, CapabilityRegistry, CapabilityRole,
    };
    use hive::context::AssembledContext;
    use hive::node::{NodeType, PlanOutput, PlannedTask, TaskKind, TaskNode};
    use hive::review::{ReviewDecision, ReviewGate};
    use hive::trace::{InMemoryTraceSink, StageOutcome, TraceSink};
    use hive::{EngineConfig, EngineError, ExecutionEngine, NodeStatus};

    fn planned(goal: &str, deps: Vec<usize>) -> PlannedTask {
        PlannedTask {
            goal: goal.into(),
            task_kind: TaskKind::think(),
            node_type: NodeType::Execute,
            depends_on_indices: deps,
        }
    }

    fn plan_of(tasks: Vec<PlannedTask>) -> PlanOutput {
        PlanOutput { tasks }
    }

    /// 记录每次聚合看到的条目目标，便于断言冗余消除
    #[derive(Default)]
    struct RecordingAggregator {
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingAggregator {
        fn seen(&self) -> Vec<Vec<String>> {
            self.seen.lock().map(|s| s.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Capability for RecordingAggregator {
        fn name(&self) -> &str {
            "recording_aggregator"
        }

        fn role(&self) -> CapabilityRole {
            CapabilityRole::Aggregator
        }

        async fn invoke(
            &self,
            _node: &TaskNode,
            input: &CapabilityInput,
            _trace: &dyn TraceSink,
        ) -> Result<CapabilityOutput, String> {
            let CapabilityInput::Aggregate { context } = input else {
                return Err("expected an aggregation context".into());
            };
            let goals: Vec<String> = context.items.iter().map(|i| i.goal.clone()).collect();
            let rendered = context
                .items
                .iter()
                .map(|i| format!("[{}] {}", i.goal, i.content))
                .collect::<Vec<_>>()
                .join("; ");
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(goals);
            }
            Ok(CapabilityOutput::Value(serde_json::json!(rendered)))
        }
    }

    struct Fixture {
        registry: CapabilityRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: CapabilityRegistry::new(),
            }
        }

        fn with(mut self, role: CapabilityRole, capability: Arc<dyn Capability>) -> Self {
            self.registry.register(role, None, capability).unwrap();
            self
        }

        fn engine(self, config: EngineConfig) -> ExecutionEngine {
            ExecutionEngine::builder(self.registry).config(config).build()
        }
    }

    #[tokio::test]
    async fn dominating_child_is_aggregated_alone() {
        // C 依赖 A 与 B：聚合上下文只含 C，A/B 的产出已纳入 C 的输入
        let planner = Arc::new(ScriptedPlanner::new().plan_for(
            "root",
            plan_of(vec![
                planned("A", vec![]),
                planned("B", vec![]),
                planned("C", vec![0, 1]),
            ]),
        ));
        let aggregator = Arc::new(RecordingAggregator::default());
        let engine = Fixture::new()
            .with(CapabilityRole::Planner, planner)
            .with(CapabilityRole::Executor, Arc::new(ScriptedExecutor::new()))
            .with(CapabilityRole::Aggregator, aggregator.clone())
            .engine(EngineConfig::default());

        let report = engine.run("root").await.unwrap();
        assert_eq!(report.status, NodeStatus::Done);
        assert_eq!(report.node_count, 4);
        assert_eq!(aggregator.seen(), vec![vec!["C".to_string()]]);
        assert!(report.result.unwrap().summary.contains("completed: C"));
    }

    #[tokio::test]
    async fn independent_children_all_reach_aggregation() {
        let planner = Arc::new(ScriptedPlanner::new().plan_for(
            "root",
            plan_of(vec![
                planned("A", vec![]),
                planned("B", vec![]),
                planned("C", vec![]),
            ]),
        ));
        let aggregator = Arc::new(RecordingAggregator::default());
        let engine = Fixture::new()
            .with(CapabilityRole::Planner, planner)
            .with(CapabilityRole::Executor, Arc::new(ScriptedExecutor::new()))
            .with(CapabilityRole::Aggregator, aggregator.clone())
            .engine(EngineConfig::default());

        let report = engine.run("root").await.unwrap();
        assert_eq!(report.status, NodeStatus::Done);
        assert_eq!(
            aggregator.seen(),
            vec![vec!["A".to_string(), "B".to_string(), "C".to_string()]]
        );
    }

    #[tokio::test]
    async fn empty_plan_means_nothing_left_to_do() {
        // 未预置目标的 Planner 返回空计划：空子图平凡聚合，根直接完成
        let aggregator = Arc::new(RecordingAggregator::default());
        let engine = Fixture::new()
            .with(CapabilityRole::Planner, Arc::new(ScriptedPlanner::new()))
            .with(CapabilityRole::Executor, Arc::new(ScriptedExecutor::new()))
            .with(CapabilityRole::Aggregator, aggregator.clone())
            .engine(EngineConfig::default());

        let report = engine.run("root").await.unwrap();
        assert_eq!(report.status, NodeStatus::Done);
        assert_eq!(report.node_count, 1);
        assert_eq!(aggregator.seen(), vec![Vec::<String>::new()]);
    }

    #[tokio::test]
    async fn failed_child_contributes_error_text_not_a_placeholder() {
        let planner = Arc::new(ScriptedPlanner::new().plan_for(
            "root",
            plan_of(vec![planned("A", vec![]), planned("B", vec![])]),
        ));
        let executor = Arc::new(
            ScriptedExecutor::new()
                .output_for("A", serde_json::json!("alpha"))
                .fail_for("B", "boom"),
        );
        let aggregator = Arc::new(RecordingAggregator::default());
        let trace = Arc::new(InMemoryTraceSink::new());
        let fixture = Fixture::new()
            .with(CapabilityRole::Planner, planner)
            .with(CapabilityRole::Executor, executor)
            .with(CapabilityRole::Aggregator, aggregator.clone());
        let engine = ExecutionEngine::builder(fixture.registry)
            .config(EngineConfig::default())
            .trace_sink(trace.clone())
            .build();

        let report = engine.run("root").await.unwrap();
        // 部分失败不阻止聚合：失败子节点以错误文本入上下文
        assert_eq!(report.status, NodeStatus::Done);
        let summary = report.result.unwrap().summary;
        assert!(summary.contains("alpha"));
        assert!(summary.contains("boom"));

        let graph = engine.graph().unwrap();
        let graph = graph.read().await;
        let failed: Vec<_> = graph
            .creation_order()
            .iter()
            .filter_map(|id| graph.get(id))
            .filter(|n| n.status == NodeStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().unwrap().contains("boom"));

        // 执行阶段的追踪记录带着失败文本闭合
        let error_stages: Vec<_> = trace
            .records()
            .into_iter()
            .filter(|r| {
                r.stage == "execute"
                    && matches!(
                        r.outcome,
                        Some(StageOutcome::Error { ref message }) if message.contains("boom")
                    )
            })
            .collect();
        assert_eq!(error_stages.len(), 1);
        assert_eq!(error_stages[0].node_id, failed[0].id);
    }

    #[tokio::test]
    async fn depth_guard_forces_execute_without_consulting_the_atomizer() {
        // max_depth = 1：layer 1 的子节点强制执行，Atomizer 绝不被调用
        let atomizer = Arc::new(ScriptedAtomizer::new(5));
        let planner = Arc::new(ScriptedPlanner::new().plan_for(
            "root",
            plan_of(vec![planned("A", vec![]), planned("B", vec![])]),
        ));
        let mut config = EngineConfig::default();
        config.engine.max_depth = 1;
        let engine = Fixture::new()
            .with(CapabilityRole::Atomizer, atomizer.clone())
            .with(CapabilityRole::Planner, planner)
            .with(CapabilityRole::Executor, Arc::new(ScriptedExecutor::new()))
            .with(CapabilityRole::Aggregator, Arc::new(JoinAggregator::new()))
            .engine(config);

        let report = engine.run("root").await.unwrap();
        assert_eq!(report.status, NodeStatus::Done);
        // 根走强制规划，子节点走深度护栏：全程不询问 Atomizer
        assert_eq!(atomizer.invocations(), 0);
    }

    #[tokio::test]
    async fn all_children_failing_triggers_bounded_replanning() {
        // 每轮计划都只有一个注定失败的子节点：重规划次数用尽后根失败
        let planner = Arc::new(
            ScriptedPlanner::new().plan_for("root", plan_of(vec![planned("doomed", vec![])])),
        );
        let executor = Arc::new(ScriptedExecutor::new().fail_for("doomed", "no way"));
        let mut config = EngineConfig::default();
        config.engine.max_replan_attempts = 1;
        let engine = Fixture::new()
            .with(CapabilityRole::Planner, planner.clone())
            .with(CapabilityRole::Executor, executor)
            .with(CapabilityRole::Aggregator, Arc::new(JoinAggregator::new()))
            .engine(config);

        let report = engine.run("root").await.unwrap();
        assert_eq!(report.status, NodeStatus::Failed);
        assert!(report.error.unwrap().contains("exhausted"));
        // 初次规划 + 一次系统重规划
        assert_eq!(planner.invocations(), 2);

        let graph = engine.graph().unwrap();
        let graph = graph.read().await;
        assert_eq!(graph.node(graph.root_id()).unwrap().replan_attempts, 1);
    }

    #[tokio::test]
    async fn replanning_recovers_when_the_second_plan_succeeds() {
        // 同一目标预置两份计划：第一份失败，系统重规划换到第二份后成功
        let planner = Arc::new(
            ScriptedPlanner::new()
                .plan_for("root", plan_of(vec![planned("bad", vec![])]))
                .plan_for("root", plan_of(vec![planned("good", vec![])])),
        );
        let executor = Arc::new(ScriptedExecutor::new().fail_for("bad", "wrong approach"));
        let mut config = EngineConfig::default();
        config.engine.max_replan_attempts = 2;
        let engine = Fixture::new()
            .with(CapabilityRole::Planner, planner.clone())
            .with(CapabilityRole::Executor, executor)
            .with(CapabilityRole::Aggregator, Arc::new(JoinAggregator::new()))
            .engine(config);

        let report = engine.run("root").await.unwrap();
        assert_eq!(report.status, NodeStatus::Done);
        assert!(report.result.unwrap().summary.contains("completed: good"));
        assert_eq!(planner.invocations(), 2);
    }

    /// 第一次计划评审要求修改，修订计划评审批准
    struct ModifyOnceGate {
        plan_reviews: AtomicUsize,
    }

    #[async_trait]
    impl ReviewGate for ModifyOnceGate {
        async fn review_plan(&self, _node: &TaskNode, _plan: &PlanOutput) -> ReviewDecision {
            self.plan_reviews.fetch_add(1, Ordering::SeqCst);
            ReviewDecision::RequestModification {
                instructions: "merge the first two steps".into(),
            }
        }

        async fn review_modified_plan(
            &self,
            _node: &TaskNode,
            _plan: &PlanOutput,
        ) -> ReviewDecision {
            ReviewDecision::Approved
        }

        async fn review_execution(
            &self,
            _node: &TaskNode,
            _context: &AssembledContext,
        ) -> ReviewDecision {
            ReviewDecision::Approved
        }
    }

    #[tokio::test]
    async fn requested_modification_goes_through_the_plan_modifier_unbounded() {
        let planner = Arc::new(ScriptedPlanner::new().plan_for(
            "root",
            plan_of(vec![planned("step1", vec![]), planned("step2", vec![])]),
        ));
        let modifier = Arc::new(ScriptedPlanModifier::new(plan_of(vec![planned(
            "merged step",
            vec![],
        )])));
        let gate = Arc::new(ModifyOnceGate {
            plan_reviews: AtomicUsize::new(0),
        });

        let mut config = EngineConfig::default();
        config.review.plans = true;
        // 上限为零也不拦用户修改路径：修改不计入系统尝试次数
        config.engine.max_replan_attempts = 0;

        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityRole::Planner, None, planner.clone()).unwrap();
        registry
            .register(CapabilityRole::PlanModifier, None, modifier.clone())
            .unwrap();
        registry
            .register(CapabilityRole::Executor, None, Arc::new(ScriptedExecutor::new()))
            .unwrap();
        registry
            .register(CapabilityRole::Aggregator, None, Arc::new(JoinAggregator::new()))
            .unwrap();
        let engine = ExecutionEngine::builder(registry)
            .config(config)
            .review_gate(gate.clone())
            .build();

        let report = engine.run("root").await.unwrap();
        assert_eq!(report.status, NodeStatus::Done);
        assert!(report.result.unwrap().summary.contains("merged step"));
        assert_eq!(gate.plan_reviews.load(Ordering::SeqCst), 1);
        assert_eq!(modifier.invocations(), 1);
        assert_eq!(planner.invocations(), 1);

        let graph = engine.graph().unwrap();
        let graph = graph.read().await;
        assert_eq!(graph.node(graph.root_id()).unwrap().replan_attempts, 0);
    }

    /// 第一次计划评审要求修改，其后一律批准（修订与兜底重规划都会再次送审）
    struct ModifyFirstPlanGate {
        plan_reviews: AtomicUsize,
    }

    #[async_trait]
    impl ReviewGate for ModifyFirstPlanGate {
        async fn review_plan(&self, _node: &TaskNode, _plan: &PlanOutput) -> ReviewDecision {
            if self.plan_reviews.fetch_add(1, Ordering::SeqCst) == 0 {
                ReviewDecision::RequestModification {
                    instructions: "try a different breakdown".into(),
                }
            } else {
                ReviewDecision::Approved
            }
        }

        async fn review_modified_plan(
            &self,
            _node: &TaskNode,
            _plan: &PlanOutput,
        ) -> ReviewDecision {
            ReviewDecision::Approved
        }

        async fn review_execution(
            &self,
            _node: &TaskNode,
            _context: &AssembledContext,
        ) -> ReviewDecision {
            ReviewDecision::Approved
        }
    }

    #[tokio::test]
    async fn modification_without_a_modifier_is_not_bounded_by_replan_attempts() {
        // 无 PlanModifier 注册：用户修改落到全量重规划兜底，
        // 上限为零也不拦截，计数器保持不动
        let planner = Arc::new(
            ScriptedPlanner::new()
                .plan_for("root", plan_of(vec![planned("step1", vec![])]))
                .plan_for("root", plan_of(vec![planned("fallback step", vec![])])),
        );
        let gate = Arc::new(ModifyFirstPlanGate {
            plan_reviews: AtomicUsize::new(0),
        });
        let mut config = EngineConfig::default();
        config.review.plans = true;
        config.engine.max_replan_attempts = 0;

        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityRole::Planner, None, planner.clone()).unwrap();
        registry
            .register(CapabilityRole::Executor, None, Arc::new(ScriptedExecutor::new()))
            .unwrap();
        registry
            .register(CapabilityRole::Aggregator, None, Arc::new(JoinAggregator::new()))
            .unwrap();
        let engine = ExecutionEngine::builder(registry)
            .config(config)
            .review_gate(gate.clone())
            .build();

        let report = engine.run("root").await.unwrap();
        assert_eq!(report.status, NodeStatus::Done);
        assert!(report.result.unwrap().summary.contains("fallback step"));
        // 初次规划 + 兜底重规划，兜底计划再次送普通计划评审
        assert_eq!(planner.invocations(), 2);
        assert_eq!(gate.plan_reviews.load(Ordering::SeqCst), 2);

        let graph = engine.graph().unwrap();
        let graph = graph.read().await;
        assert_eq!(graph.node(graph.root_id()).unwrap().replan_attempts, 0);
    }

    /// 永不回话的评审门，用于验证超时策略
    struct SilentGate;

    #[async_trait]
    impl ReviewGate for SilentGate {
        async fn review_plan(&self, _node: &TaskNode, _plan: &PlanOutput) -> ReviewDecision {
            sleep(Duration::from_secs(60)).await;
            ReviewDecision::Approved
        }

        async fn review_modified_plan(
            &self,
            _node: &TaskNode,
            _plan: &PlanOutput,
        ) -> ReviewDecision {
            sleep(Duration::from_secs(60)).await;
            ReviewDecision::Approved
        }

        async fn review_execution(
            &self,
            _node: &TaskNode,
            _context: &AssembledContext,
        ) -> ReviewDecision {
            sleep(Duration::from_secs(60)).await;
            ReviewDecision::Approved
        }
    }

    fn review_fixture(policy_reject: bool) -> ExecutionEngine {
        let planner = Arc::new(
            ScriptedPlanner::new().plan_for("root", plan_of(vec![planned("A", vec![])])),
        );
        let mut config = EngineConfig::default();
        config.review.plans = true;
        config.review.timeout_secs = 0;
        config.review.on_timeout = if policy_reject {
            hive::TimeoutPolicy::Reject
        } else {
            hive::TimeoutPolicy::Approve
        };

        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityRole::Planner, None, planner).unwrap();
        registry
            .register(CapabilityRole::Executor, None, Arc::new(ScriptedExecutor::new()))
            .unwrap();
        registry
            .register(CapabilityRole::Aggregator, None, Arc::new(JoinAggregator::new()))
            .unwrap();
        ExecutionEngine::builder(registry)
            .config(config)
            .review_gate(Arc::new(SilentGate))
            .build()
    }

    #[tokio::test]
    async fn review_timeout_with_approve_policy_lets_the_graph_proceed() {
        let report = review_fixture(false).run("root").await.unwrap();
        assert_eq!(report.status, NodeStatus::Done);
    }

    #[tokio::test]
    async fn review_timeout_with_reject_policy_fails_the_node() {
        let report = review_fixture(true).run("root").await.unwrap();
        assert_eq!(report.status, NodeStatus::Failed);
        assert!(report.error.unwrap().contains("rejected"));
    }

    /// 挂起不返回的执行器，用于验证取消
    struct SleepingExecutor;

    #[async_trait]
    impl Capability for SleepingExecutor {
        fn name(&self) -> &str {
            "sleeping_executor"
        }

        fn role(&self) -> CapabilityRole {
            CapabilityRole::Executor
        }

        async fn invoke(
            &self,
            _node: &TaskNode,
            _input: &CapabilityInput,
            _trace: &dyn TraceSink,
        ) -> Result<CapabilityOutput, String> {
            sleep(Duration::from_secs(60)).await;
            Ok(CapabilityOutput::Value(serde_json::json!("late")))
        }
    }

    #[tokio::test]
    async fn cancellation_drains_in_flight_work_and_marks_nodes_cancelled() {
        let planner = Arc::new(
            ScriptedPlanner::new().plan_for("root", plan_of(vec![planned("slow", vec![])])),
        );
        let engine = Fixture::new()
            .with(CapabilityRole::Planner, planner)
            .with(CapabilityRole::Executor, Arc::new(SleepingExecutor))
            .with(CapabilityRole::Aggregator, Arc::new(JoinAggregator::new()))
            .engine(EngineConfig::default());

        let token = engine.cancel_token();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let outcome = engine.run("root").await;
        assert!(matches!(outcome, Err(EngineError::Cancelled)));

        let graph = engine.graph().unwrap();
        let graph = graph.read().await;
        for id in graph.creation_order() {
            let node = graph.node(id).unwrap();
            assert!(node.is_terminal(), "node {} still {}", node.goal, node.status);
            assert_eq!(node.status, NodeStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn enabled_cache_short_circuits_identical_invocations() {
        // 同一引擎跑两次相同目标：第二次规划与执行全部命中缓存
        let planner = Arc::new(ScriptedPlanner::new().plan_for(
            "root",
            plan_of(vec![planned("A", vec![]), planned("B", vec![])]),
        ));
        let executor = Arc::new(ScriptedExecutor::new());
        let mut config = EngineConfig::default();
        config.cache.enabled = true;
        config.cache.ttl_secs = 600;
        let engine = Fixture::new()
            .with(CapabilityRole::Planner, planner.clone())
            .with(CapabilityRole::Executor, executor.clone())
            .with(CapabilityRole::Aggregator, Arc::new(JoinAggregator::new()))
            .engine(config);

        let first = engine.run("root").await.unwrap();
        assert_eq!(first.status, NodeStatus::Done);
        assert_eq!(planner.invocations(), 1);
        assert_eq!(executor.invocations(), 2);

        let second = engine.run("root").await.unwrap();
        assert_eq!(second.status, NodeStatus::Done);
        assert_eq!(planner.invocations(), 1);
        assert_eq!(executor.invocations(), 2);
    }

    #[tokio::test]
    async fn event_stream_reports_the_run() {
        let planner = Arc::new(
            ScriptedPlanner::new().plan_for("root", plan_of(vec![planned("A", vec![])])),
        );
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityRole::Planner, None, planner).unwrap();
        registry
            .register(CapabilityRole::Executor, None, Arc::new(ScriptedExecutor::new()))
            .unwrap();
        registry
            .register(CapabilityRole::Aggregator, None, Arc::new(JoinAggregator::new()))
            .unwrap();
        let (builder, mut events) =
            ExecutionEngine::builder(registry).config(EngineConfig::default()).events();
        let engine = builder.build();

        let report = engine.run("root").await.unwrap();
        assert_eq!(report.status, NodeStatus::Done);

        let mut saw_plan_accepted = false;
        let mut saw_run_finished = false;
        let mut completed = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                hive::EngineEvent::PlanAccepted { children, .. } => {
                    saw_plan_accepted = true;
                    assert_eq!(children, 1);
                }
                hive::EngineEvent::RunFinished { status, .. } => {
                    saw_run_finished = true;
                    assert_eq!(status, NodeStatus::Done);
                }
                hive::EngineEvent::NodeCompleted { .. } => completed += 1,
                _ => {}
            }
        }
        assert!(saw_plan_accepted);
        assert!(saw_run_finished);
        // 子节点执行完成 + 根聚合完成
        assert_eq!(completed, 2);
    }
}
