//! 依赖闭包与冗余消除
//!
//! 迭代式（显式栈 + 备忘）计算子节点的传递依赖闭包，环是显式检出的错误而非静默截断；
//! 在此之上实现聚合前的冗余消除：若某个已完成子节点的闭包覆盖了其余全部已完成兄弟，
//! 它已把兄弟的产出纳入自己的输入上下文，聚合只取该节点即可，再并入兄弟会重复信息。

use std::collections::{HashMap, HashSet};

use crate::error::EngineError;
use crate::graph::TaskGraph;
use crate::node::{NodeId, NodeStatus, TaskNode};

/// 计算 start 的传递依赖闭包（不含 start 自身）。
/// 显式栈深度优先，memo 跨起点复用；发现在途节点被重新访问即为环。
pub fn transitive_closure(
    deps: &HashMap<NodeId, Vec<NodeId>>,
    start: &NodeId,
    memo: &mut HashMap<NodeId, HashSet<NodeId>>,
) -> Result<HashSet<NodeId>, EngineError> {
    if let Some(known) = memo.get(start) {
        return Ok(known.clone());
    }

    // 栈帧：(节点, 已展开的子序号)
    let mut stack: Vec<(NodeId, usize)> = vec![(start.clone(), 0)];
    let mut on_path: HashSet<NodeId> = HashSet::from([start.clone()]);
    static EMPTY: Vec<NodeId> = Vec::new();

    while let Some((node, idx)) = stack.last().cloned() {
        let children = deps.get(&node).unwrap_or(&EMPTY);
        if idx < children.len() {
            if let Some(frame) = stack.last_mut() {
                frame.1 += 1;
            }
            let next = &children[idx];
            if on_path.contains(next) {
                return Err(EngineError::DependencyCycle(next.clone()));
            }
            if memo.contains_key(next) {
                continue;
            }
            on_path.insert(next.clone());
            stack.push((next.clone(), 0));
        } else {
            // 全部子节点已有备忘，合并为本节点闭包
            let mut closure: HashSet<NodeId> = children.iter().cloned().collect();
            for child in children {
                if let Some(sub) = memo.get(child) {
                    closure.extend(sub.iter().cloned());
                }
            }
            memo.insert(node.clone(), closure);
            on_path.remove(&node);
            stack.pop();
        }
    }

    Ok(memo.get(start).cloned().unwrap_or_default())
}

/// 聚合用的冗余消除：返回应纳入聚合上下文的子节点 id（计划顺序）。
///
/// 只考虑已完成（DONE/FAILED）的子节点。若存在闭包 ⊇ 其余全部已完成兄弟的节点，
/// 取计划顺序中的第一个（确定性平局规则）；否则每个已完成子节点恰好纳入一次。
pub fn eliminate_redundancy(
    graph: &TaskGraph,
    parent: &TaskNode,
) -> Result<Vec<NodeId>, EngineError> {
    let Some(sub_graph_id) = &parent.sub_graph_id else {
        return Err(EngineError::Validation(format!(
            "node {} has no sub-graph to aggregate",
            parent.id
        )));
    };

    let order: Vec<&TaskNode> = graph.sub_graph_nodes(sub_graph_id);
    let completed: Vec<NodeId> = order
        .iter()
        .filter(|n| matches!(n.status, NodeStatus::Done | NodeStatus::Failed))
        .map(|n| n.id.clone())
        .collect();
    if completed.len() < 2 {
        return Ok(completed);
    }

    // 依赖表覆盖子图全部成员：闭包可以途经未完成的兄弟
    let mut deps: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for node in &order {
        deps.insert(node.id.clone(), graph.resolve_dependencies(&node.id)?);
    }

    let mut memo = HashMap::new();
    for candidate in &completed {
        let closure = transitive_closure(&deps, candidate, &mut memo)?;
        let dominates = completed
            .iter()
            .all(|other| other == candidate || closure.contains(other));
        if dominates {
            return Ok(vec![candidate.clone()]);
        }
    }

    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeType, PlanOutput, PlannedTask, TaskKind, TaskNode};

    fn planned(goal: &str, deps: Vec<usize>) -> PlannedTask {
        PlannedTask {
            goal: goal.into(),
            task_kind: TaskKind::think(),
            node_type: NodeType::Execute,
            depends_on_indices: deps,
        }
    }

    fn graph_with_children(tasks: Vec<PlannedTask>) -> (TaskGraph, NodeId, Vec<NodeId>) {
        let root = TaskNode::new_root("root");
        let root_id = root.id.clone();
        let mut graph = TaskGraph::new(root);
        let (_, children) = graph.adopt_plan(&root_id, &PlanOutput { tasks }).unwrap();
        for id in &children {
            graph.node_mut(id).unwrap().status = NodeStatus::Done;
        }
        (graph, root_id, children)
    }

    #[test]
    fn closure_is_transitive() {
        let deps: HashMap<NodeId, Vec<NodeId>> = HashMap::from([
            ("a".to_string(), vec![]),
            ("b".to_string(), vec!["a".to_string()]),
            ("c".to_string(), vec!["b".to_string()]),
        ]);
        let mut memo = HashMap::new();
        let closure = transitive_closure(&deps, &"c".to_string(), &mut memo).unwrap();
        assert_eq!(closure, HashSet::from(["a".to_string(), "b".to_string()]));
        // memo 可复用
        assert!(memo.contains_key("b"));
    }

    #[test]
    fn cycle_is_a_detected_error() {
        let deps: HashMap<NodeId, Vec<NodeId>> = HashMap::from([
            ("a".to_string(), vec!["b".to_string()]),
            ("b".to_string(), vec!["a".to_string()]),
        ]);
        let mut memo = HashMap::new();
        let err = transitive_closure(&deps, &"a".to_string(), &mut memo).unwrap_err();
        assert!(matches!(err, EngineError::DependencyCycle(_)));
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        // 递归实现会在深计划上爆栈，迭代实现不会
        let mut deps: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for i in 0..10_000u32 {
            let cur = format!("n{i}");
            let prev = if i == 0 { vec![] } else { vec![format!("n{}", i - 1)] };
            deps.insert(cur, prev);
        }
        let mut memo = HashMap::new();
        let closure = transitive_closure(&deps, &"n9999".to_string(), &mut memo).unwrap();
        assert_eq!(closure.len(), 9999);
    }

    #[test]
    fn dominating_child_is_used_alone() {
        // C 依赖 A 与 B：闭包 {A,B} ⊇ 其余兄弟，聚合只取 C
        let (graph, root_id, children) = graph_with_children(vec![
            planned("A", vec![]),
            planned("B", vec![]),
            planned("C", vec![0, 1]),
        ]);
        let parent = graph.node(&root_id).unwrap();
        let included = eliminate_redundancy(&graph, parent).unwrap();
        assert_eq!(included, vec![children[2].clone()]);
    }

    #[test]
    fn no_dominator_includes_everyone_once() {
        let (graph, root_id, children) = graph_with_children(vec![
            planned("A", vec![]),
            planned("B", vec![]),
            planned("C", vec![]),
        ]);
        let parent = graph.node(&root_id).unwrap();
        let included = eliminate_redundancy(&graph, parent).unwrap();
        assert_eq!(included, children);
    }

    #[test]
    fn first_dominator_in_plan_order_wins() {
        // B 依赖 A，C 依赖 B（传递覆盖 A）；B 不覆盖 C，C 覆盖 {A,B}
        let (graph, root_id, children) = graph_with_children(vec![
            planned("A", vec![]),
            planned("B", vec![0]),
            planned("C", vec![1]),
        ]);
        let parent = graph.node(&root_id).unwrap();
        let included = eliminate_redundancy(&graph, parent).unwrap();
        assert_eq!(included, vec![children[2].clone()]);
    }

    #[test]
    fn in_flight_siblings_are_invisible() {
        let (mut graph, root_id, children) = graph_with_children(vec![
            planned("A", vec![]),
            planned("B", vec![]),
        ]);
        graph.node_mut(&children[1]).unwrap().status = NodeStatus::Running;
        let parent = graph.node(&root_id).unwrap().clone();
        let included = eliminate_redundancy(&graph, &parent).unwrap();
        assert_eq!(included, vec![children[0].clone()]);
    }
}
