//! 任务节点：状态机的数据面与裁定面

mod transition;
mod types;

pub use transition::TransitionAuthority;
pub use types::{
    NodeId, NodeResult, NodeStatus, NodeType, OutputKind, PlanOutput, PlannedTask, ReplanTrigger,
    SubGraphId, TaskKind, TaskNode,
};
