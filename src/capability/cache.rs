//! 能力调用缓存
//!
//! 按角色分命名空间、TTL 约束的记忆化：键为（角色、能力名、节点目标、入参）序列化后的哈希。
//! 未命中或已过期总是落到真实调用；缓存永远不是权威数据。

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::capability::{CapabilityInput, CapabilityOutput, CapabilityRole};

struct CacheEntry {
    output: CapabilityOutput,
    stored_at: Instant,
}

/// 能力调用缓存（内存实现）
pub struct CapabilityCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl CapabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// 组合缓存键；入参无法序列化时返回 None（调用方跳过缓存）
    pub fn key(
        &self,
        role: CapabilityRole,
        capability: &str,
        goal: &str,
        input: &CapabilityInput,
    ) -> Option<String> {
        let serialized = serde_json::to_string(input).ok()?;
        let mut hasher = DefaultHasher::new();
        capability.hash(&mut hasher);
        goal.hash(&mut hasher);
        serialized.hash(&mut hasher);
        Some(format!("{}:{:016x}", role, hasher.finish()))
    }

    pub fn get(&self, key: &str) -> Option<CapabilityOutput> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;
        if entry.stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.output.clone())
    }

    pub fn put(&self, key: String, output: CapabilityOutput) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key,
                CacheEntry {
                    output,
                    stored_at: Instant::now(),
                },
            );
            // 顺手清理过期条目，避免无界增长
            let ttl = self.ttl;
            entries.retain(|_, e| e.stored_at.elapsed() <= ttl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AssembledContext, ContextKind};

    fn input(goal: &str) -> CapabilityInput {
        CapabilityInput::Execute {
            context: AssembledContext {
                node_id: "n1".into(),
                kind: ContextKind::Execution,
                goal: goal.into(),
                layer: 0,
                ancestor_goals: vec![],
                items: vec![],
            },
        }
    }

    #[test]
    fn hit_within_ttl_miss_after_expiry() {
        let cache = CapabilityCache::new(Duration::from_millis(20));
        let key = cache
            .key(CapabilityRole::Executor, "exec", "g", &input("g"))
            .unwrap();
        cache.put(key.clone(), CapabilityOutput::Value(serde_json::json!("v")));
        assert!(cache.get(&key).is_some());

        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn distinct_inputs_get_distinct_keys() {
        let cache = CapabilityCache::new(Duration::from_secs(60));
        let k1 = cache
            .key(CapabilityRole::Executor, "exec", "g1", &input("g1"))
            .unwrap();
        let k2 = cache
            .key(CapabilityRole::Executor, "exec", "g2", &input("g2"))
            .unwrap();
        assert_ne!(k1, k2);
    }
}
