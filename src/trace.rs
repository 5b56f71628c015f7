//! 阶段追踪
//!
//! 处理器每次运行记录一个命名阶段（start/complete，附输出摘要或错误）。
//! 尽力而为：接口不可失败、不阻塞，追踪故障绝不影响核心逻辑。

use std::sync::Mutex;

use serde::Serialize;

/// 阶段结束时的产物
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutcome {
    Output { summary: String },
    Error { message: String },
}

/// 一条阶段记录
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub node_id: String,
    pub stage: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub outcome: Option<StageOutcome>,
}

/// 追踪汇聚点：同步、不可失败
pub trait TraceSink: Send + Sync {
    fn start_stage(&self, node_id: &str, stage: &str);
    fn complete_stage(&self, node_id: &str, stage: &str, outcome: StageOutcome);
}

/// 丢弃全部记录（未配置追踪时使用）
#[derive(Default)]
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn start_stage(&self, _node_id: &str, _stage: &str) {}

    fn complete_stage(&self, _node_id: &str, _stage: &str, _outcome: StageOutcome) {}
}

/// 内存追踪：保留 StageRecord 列表，供测试与调试查询
#[derive(Default)]
pub struct InMemoryTraceSink {
    records: Mutex<Vec<StageRecord>>,
}

impl InMemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StageRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl TraceSink for InMemoryTraceSink {
    fn start_stage(&self, node_id: &str, stage: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(StageRecord {
                node_id: node_id.to_string(),
                stage: stage.to_string(),
                started_at: chrono::Utc::now().timestamp_millis(),
                completed_at: None,
                outcome: None,
            });
        }
    }

    fn complete_stage(&self, node_id: &str, stage: &str, outcome: StageOutcome) {
        if let Ok(mut records) = self.records.lock() {
            // 回填最近一条未闭合的同名阶段
            if let Some(open) = records
                .iter_mut()
                .rev()
                .find(|r| r.node_id == node_id && r.stage == stage && r.completed_at.is_none())
            {
                open.completed_at = Some(chrono::Utc::now().timestamp_millis());
                open.outcome = Some(outcome);
            }
        }
    }
}
