//! 引擎配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ENGINE__MAX_DEPTH=3`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 引擎配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub review: ReviewSection,
    #[serde(default)]
    pub cache: CacheSection,
}

/// [engine] 段：分解深度、调度并发与重规划上限
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// 最大分解深度；layer 达到该值的节点强制 EXECUTE，不再调用 Atomizer
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// 根节点是否强制走 PLAN（跳过原子判断）
    #[serde(default = "default_force_root_planning")]
    pub force_root_planning: bool,
    /// 完全绕过 Atomizer，改用纯深度阈值判断
    #[serde(default)]
    pub skip_atomizer: bool,
    /// skip_atomizer 时的深度阈值：layer 低于该值 PLAN，否则 EXECUTE
    #[serde(default = "default_atomizer_depth_threshold")]
    pub atomizer_depth_threshold: u32,
    /// 同时在途的节点处理操作上限
    #[serde(default = "default_max_concurrent_nodes")]
    pub max_concurrent_nodes: usize,
    /// 系统发起的重规划最大尝试次数（用户修改不计入）
    #[serde(default = "default_max_replan_attempts")]
    pub max_replan_attempts: u32,
    /// 单次能力调用超时（秒）
    #[serde(default = "default_capability_timeout_secs")]
    pub capability_timeout_secs: u64,
}

fn default_max_depth() -> u32 {
    5
}

fn default_force_root_planning() -> bool {
    true
}

fn default_atomizer_depth_threshold() -> u32 {
    2
}

fn default_max_concurrent_nodes() -> usize {
    4
}

fn default_max_replan_attempts() -> u32 {
    2
}

fn default_capability_timeout_secs() -> u64 {
    60
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            force_root_planning: default_force_root_planning(),
            skip_atomizer: false,
            atomizer_depth_threshold: default_atomizer_depth_threshold(),
            max_concurrent_nodes: default_max_concurrent_nodes(),
            max_replan_attempts: default_max_replan_attempts(),
            capability_timeout_secs: default_capability_timeout_secs(),
        }
    }
}

/// 评审等待超时后的默认裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// 视为批准（无人值守时让图继续推进）
    Approve,
    /// 视为拒绝
    Reject,
}

/// [review] 段：各阶段人工评审开关与超时策略
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewSection {
    /// 计划是否送评审门
    #[serde(default)]
    pub plans: bool,
    /// 执行前是否送评审门
    #[serde(default)]
    pub executions: bool,
    /// 评审等待超时（秒）
    #[serde(default = "default_review_timeout_secs")]
    pub timeout_secs: u64,
    /// 超时后的默认裁决
    #[serde(default = "default_on_timeout")]
    pub on_timeout: TimeoutPolicy,
}

fn default_review_timeout_secs() -> u64 {
    300
}

fn default_on_timeout() -> TimeoutPolicy {
    TimeoutPolicy::Approve
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            plans: false,
            executions: false,
            timeout_secs: default_review_timeout_secs(),
            on_timeout: default_on_timeout(),
        }
    }
}

/// [cache] 段：能力调用记忆化（未命中总是落到真实调用，缓存永远不是权威数据）
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default)]
    pub enabled: bool,
    /// 缓存条目存活时间（秒）
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    600
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<EngineConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
