//! 处理器指标：次数、成败与平均耗时

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;

/// 单个处理器的累计指标
#[derive(Default)]
pub struct HandlerMetrics {
    runs: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_duration_ms: AtomicU64,
}

/// 指标快照（可序列化导出）
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub runs: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_duration_ms: u64,
}

impl HandlerMetrics {
    pub fn record(&self, success: bool, duration_ms: u64) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let runs = self.runs.load(Ordering::Relaxed);
        MetricsSnapshot {
            runs,
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            avg_duration_ms: if runs == 0 {
                0
            } else {
                self.total_duration_ms.load(Ordering::Relaxed) / runs
            },
        }
    }
}

/// 按处理器名聚合的指标表
#[derive(Default)]
pub struct MetricsRegistry {
    handlers: RwLock<HashMap<String, Arc<HandlerMetrics>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self, name: &str) -> Arc<HandlerMetrics> {
        if let Ok(handlers) = self.handlers.read() {
            if let Some(m) = handlers.get(name) {
                return m.clone();
            }
        }
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry(name.to_string()).or_default().clone()
    }

    pub fn snapshot(&self) -> HashMap<String, MetricsSnapshot> {
        self.handlers
            .read()
            .map(|handlers| {
                handlers
                    .iter()
                    .map(|(name, m)| (name.clone(), m.snapshot()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
